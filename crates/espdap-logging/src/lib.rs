//! Logging initialization for the espdap binaries.
//!
//! Wraps `tracing-subscriber` so every binary configures logging the same
//! way. The debug adapter owns stdout for DAP traffic, so logs default to
//! stderr; file output is available for running under an editor that
//! swallows stderr.
//!
//! ```rust,ignore
//! use espdap_logging::LogConfig;
//!
//! espdap_logging::init(LogConfig::new().debug(true));
//! ```

use std::io::IsTerminal;
use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing_appender::non_blocking::WorkerGuard;

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable debug-level logging (overrides `default_level`)
    pub debug: bool,
    /// Default log level when `RUST_LOG` is not set
    pub default_level: String,
    /// Show module target in log output
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_level: "info".to_string(),
            show_target: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
        }
    }
}

/// Initialize logging to stderr.
///
/// Call once at startup. `RUST_LOG` overrides the configured level.
///
/// # Panics
///
/// Panics if a global subscriber is already set.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let is_tty = std::io::stderr().is_terminal();
    fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_writer(std::io::stderr)
        .with_ansi(is_tty)
        .init();
}

/// Initialize non-blocking logging to a file.
///
/// The returned [`WorkerGuard`] must be held until exit so buffered log
/// lines are flushed.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created.
pub fn init_with_file(config: LogConfig, log_path: &Path) -> std::io::Result<WorkerGuard> {
    let filter = config.build_filter();

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // try_init: the adapter may run as a subprocess of something that
    // already installed a subscriber.
    let result = fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init();
    if let Err(err) = result {
        eprintln!("could not set global log subscriber: {err}");
    }

    Ok(guard)
}

/// Initialize logging for tests.
///
/// Safe to call multiple times; uses `try_init` and the test writer so
/// output lands in captured test output.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
