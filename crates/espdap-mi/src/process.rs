//! GDB subprocess lifecycle
//!
//! Spawns GDB with piped stdio, wires its stdin into a
//! [`CommandDispatcher`], and runs a reader task that parses stdout lines
//! into records and routes them: replies to the dispatcher, notifications
//! to the execution-state tracker, stream output to the session event
//! channel. Subprocess exit fails every outstanding command and surfaces as
//! a terminated event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{CommandDispatcher, DispatcherConfig};
use crate::error::{Error, Result};
use crate::exec_state::ExecStateTracker;
use crate::parser::parse_line;
use crate::record::{Record, StreamKind};

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session-level events derived from GDB's output streams.
#[derive(Debug, Clone, PartialEq)]
pub enum MiEvent {
    /// The target stopped after startup completed
    Stopped { thread_id: u64 },
    /// Console/target/log text from GDB
    Output { text: String, kind: StreamKind },
    /// GDB exited or its output stream closed
    Terminated,
}

/// How to start the GDB subprocess.
#[derive(Debug, Clone)]
pub struct GdbConfig {
    /// GDB executable (e.g. `xtensa-esp32-elf-gdb`)
    pub executable: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub dispatcher: DispatcherConfig,
}

impl GdbConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: vec!["--interpreter=mi2".to_string()],
            cwd: None,
            env: HashMap::new(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// A live GDB subprocess with its dispatcher and reader tasks.
pub struct GdbSession {
    dispatcher: Arc<CommandDispatcher>,
    child: Mutex<Option<Child>>,
}

impl GdbSession {
    /// Spawn GDB and wire up dispatch and record routing.
    ///
    /// Returns the session and the receiver for [`MiEvent`]s; the caller
    /// owns event consumption.
    pub async fn spawn(config: &GdbConfig) -> Result<(Self, mpsc::Receiver<MiEvent>)> {
        info!(executable = %config.executable, args = ?config.args, "launching GDB");

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Communication("failed to capture GDB stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Communication("failed to capture GDB stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Communication("failed to capture GDB stderr".to_string()))?;

        let exec = Arc::new(ExecStateTracker::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            stdin,
            exec,
            config.dispatcher.clone(),
        ));

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        spawn_record_reader(stdout, dispatcher.clone(), events_tx.clone());

        // GDB's stderr is not MI traffic; forward it as log output.
        let stderr_events = events_tx;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "GDB stderr");
                let _ = stderr_events
                    .send(MiEvent::Output {
                        text: line,
                        kind: StreamKind::Log,
                    })
                    .await;
            }
        });

        Ok((
            Self {
                dispatcher,
                child: Mutex::new(Some(child)),
            },
            events_rx,
        ))
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Kill the subprocess and reap it.
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Some(mut child) = child.take() {
            match child.kill().await {
                Ok(()) => debug!("GDB process killed"),
                Err(err) => warn!(error = %err, "failed to kill GDB process"),
            }
            match child.wait().await {
                Ok(status) => info!(%status, "GDB process exited"),
                Err(err) => warn!(error = %err, "failed to reap GDB process"),
            }
        }
        self.dispatcher.fail_all("session shut down").await;
    }
}

impl Drop for GdbSession {
    fn drop(&mut self) {
        // Best effort; cannot await in Drop.
        if let Some(mut child) = self.child.try_lock().ok().and_then(|mut c| c.take()) {
            let _ = child.start_kill();
        }
    }
}

/// Spawn the task that classifies GDB stdout lines and routes records.
///
/// Public so tests can drive a dispatcher from a scripted in-memory stream
/// exactly the way a real subprocess would.
pub fn spawn_record_reader<R>(
    reader: R,
    dispatcher: Arc<CommandDispatcher>,
    events: mpsc::Sender<MiEvent>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        debug!("record reader task started");
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => route_line(&line, &dispatcher, &events).await,
                Ok(None) => {
                    info!("GDB output stream closed (EOF)");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "GDB output stream error");
                    break;
                }
            }
        }

        dispatcher.fail_all("GDB exited").await;
        let _ = events.send(MiEvent::Terminated).await;
    })
}

async fn route_line(
    line: &str,
    dispatcher: &Arc<CommandDispatcher>,
    events: &mpsc::Sender<MiEvent>,
) {
    let record = match parse_line(line) {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(err) => {
            warn!(line = %line, error = %err, "unparseable MI line");
            return;
        }
    };

    match record {
        Record::Result(result) => dispatcher.complete(result).await,
        Record::Notify(notify) => match dispatcher.exec_state().observe(&notify) {
            Ok(Some(thread_id)) => {
                let _ = events.send(MiEvent::Stopped { thread_id }).await;
            }
            Ok(None) => {}
            // Contract violation from GDB; loud, but the session survives.
            Err(err) => error!(class = %notify.class, error = %err, "malformed notification"),
        },
        Record::Stream(stream) => {
            let _ = events
                .send(MiEvent::Output {
                    text: stream.text,
                    kind: stream.kind,
                })
                .await;
        }
    }
}
