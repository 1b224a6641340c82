//! Launch configuration
//!
//! Deserialized straight from the DAP launch request's arguments. Every
//! field has a default matching the classic ESP32 + OpenOCD setup so a
//! minimal launch configuration just works on a stock toolchain.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use espdap_mi::{DispatcherConfig, GdbConfig};

/// Arguments of the `launch` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// Path to the program being debugged (passed to GDB on its command line)
    #[serde(default)]
    pub program: Option<String>,

    /// GDB executable
    #[serde(default = "default_gdb_path")]
    pub gdb_path: String,

    /// Extra GDB arguments, appended after the MI interpreter flag
    #[serde(default)]
    pub gdb_args: Vec<String>,

    /// Working directory for GDB
    #[serde(default)]
    pub cwd: Option<String>,

    /// Extra environment for GDB
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Address of the GDB server (OpenOCD) to attach to
    #[serde(default = "default_target_remote")]
    pub target_remote: String,

    /// Function to hold the target at after reset; a temporary hardware
    /// breakpoint is installed here during startup
    #[serde(default = "default_entry_symbol")]
    pub entry_symbol: String,

    /// Full override of the startup command sequence. When set, it
    /// replaces the generated sequence entirely.
    #[serde(default)]
    pub startup_commands: Option<Vec<String>>,

    /// How long readiness-gated requests wait for startup to finish
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Poll cadence of the command dispatcher
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

fn default_gdb_path() -> String {
    "xtensa-esp32-elf-gdb".to_string()
}

fn default_target_remote() -> String {
    "localhost:3333".to_string()
}

fn default_entry_symbol() -> String {
    "app_main".to_string()
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_drain_interval_ms() -> u64 {
    10
}

impl Default for LaunchConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(Default::default()))
            .expect("defaults are total")
    }
}

impl LaunchConfig {
    /// The startup handshake, in dispatch order.
    ///
    /// The generated default mirrors the fixed ESP32 bring-up: async mode,
    /// pretty printing, attach to the GDB server, reset and halt the
    /// target, temporary hardware breakpoint on the entry symbol, resume.
    pub fn startup_commands(&self) -> Vec<String> {
        if let Some(commands) = &self.startup_commands {
            return commands.clone();
        }
        vec![
            "gdb-set target-async on".to_string(),
            "enable-pretty-printing".to_string(),
            format!(
                "interpreter-exec console \"target remote {}\"",
                self.target_remote
            ),
            "interpreter-exec console \"monitor reset halt\"".to_string(),
            format!("break-insert -t -h {}", self.entry_symbol),
            "exec-continue".to_string(),
        ]
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Subprocess configuration for the MI layer.
    pub fn gdb_config(&self) -> GdbConfig {
        let mut config = GdbConfig::new(&self.gdb_path);
        config.args.extend(self.gdb_args.iter().cloned());
        if let Some(program) = &self.program {
            config.args.push(program.clone());
        }
        config.cwd = self.cwd.clone().map(Into::into);
        config.env = self.env.clone();
        config.dispatcher = DispatcherConfig {
            drain_interval: Duration::from_millis(self.drain_interval_ms),
        };
        config
    }
}
