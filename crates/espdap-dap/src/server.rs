//! DAP server loop
//!
//! Reads editor requests one at a time, dispatches them through the
//! session bridge, and writes the response. This is the single point where
//! a bridge error turns into an editor-facing error response, so nothing
//! below this layer needs to swallow failures.
//!
//! Asynchronous traffic (target stop, console output, termination) arrives
//! on the MI event channel and is pumped to the editor as DAP events by a
//! separate task sharing the message writer.

use std::sync::Arc;

use espdap_mi::{GdbSession, MiEvent, StreamKind};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::SessionBridge;
use crate::config::LaunchConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    events, requests, Capabilities, ContinuedEventBody, EvaluateArguments, Event,
    OutputEventBody, ProtocolMessage, Request, Response, ScopesArguments,
    SetBreakpointsArguments, StackTraceArguments, StoppedEventBody, ThreadIdArguments,
    VariablesArguments,
};
use crate::transport::{MessageReader, MessageWriter};

/// A launched debug session and its background tasks.
struct Session {
    gdb: GdbSession,
    bridge: Arc<SessionBridge>,
    event_pump: JoinHandle<()>,
}

/// Serves one editor connection for its lifetime.
pub struct DapServer<R, W> {
    reader: MessageReader<R>,
    writer: Arc<Mutex<MessageWriter<W>>>,
    session: Option<Session>,
}

impl<R, W> DapServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: MessageReader::new(reader),
            writer: Arc::new(Mutex::new(MessageWriter::new(writer))),
            session: None,
        }
    }

    /// Run until the editor disconnects or the transport closes.
    pub async fn serve(mut self) -> Result<()> {
        info!("DAP session started");
        loop {
            let message = match self.reader.read_message().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!("editor closed the connection");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to read DAP message");
                    break;
                }
            };

            match message {
                ProtocolMessage::Request(request) => {
                    if self.handle_request(request).await? {
                        break;
                    }
                }
                other => warn!(?other, "ignoring non-request message from editor"),
            }
        }

        self.shutdown().await;
        info!("DAP session ended");
        Ok(())
    }

    /// Serve one request; returns true when the session should end.
    async fn handle_request(&mut self, request: Request) -> Result<bool> {
        debug!(command = %request.command, seq = request.seq, "request");
        let ending = matches!(
            request.command.as_str(),
            requests::DISCONNECT | requests::TERMINATE
        );

        let response = match self.dispatch(&request).await {
            Ok(body) => Response::success(&request, body),
            Err(err) => {
                warn!(command = %request.command, error = %err, "request failed");
                Response::error(&request, err.to_string())
            }
        };
        self.write(ProtocolMessage::Response(response)).await?;

        // The editor sends configuration (breakpoints) only after this
        // event, so it must follow the initialize response.
        if request.command == requests::INITIALIZE {
            self.write(ProtocolMessage::Event(Event::new(events::INITIALIZED, None)))
                .await?;
        }
        Ok(ending)
    }

    async fn dispatch(&mut self, request: &Request) -> Result<Option<serde_json::Value>> {
        match request.command.as_str() {
            requests::INITIALIZE => {
                let capabilities = Capabilities {
                    supports_terminate_request: true,
                    support_terminate_debuggee: true,
                    supports_delayed_stack_trace_loading: false,
                    supports_configuration_done_request: true,
                };
                Ok(Some(serde_json::to_value(capabilities)?))
            }
            requests::LAUNCH => {
                self.start_session(request).await?;
                Ok(None)
            }
            requests::CONFIGURATION_DONE => Ok(None),
            requests::SET_BREAKPOINTS => {
                let args: SetBreakpointsArguments = request.parse_arguments()?;
                let path = args
                    .source
                    .path
                    .or(args.source.name)
                    .ok_or_else(|| Error::InvalidMessage("source without a path".to_string()))?;
                let lines: Vec<u32> = args.breakpoints.iter().map(|b| b.line).collect();
                let breakpoints = self.bridge()?.set_breakpoints(&path, &lines).await?;
                Ok(Some(serde_json::json!({ "breakpoints": breakpoints })))
            }
            requests::THREADS => {
                let threads = self.bridge()?.threads().await?;
                Ok(Some(serde_json::json!({ "threads": threads })))
            }
            requests::STACK_TRACE => {
                let args: StackTraceArguments = request.parse_arguments()?;
                let frames = self.bridge()?.stack_trace(args.thread_id).await?;
                Ok(Some(serde_json::json!({
                    "stackFrames": frames,
                    "totalFrames": frames.len(),
                })))
            }
            requests::SCOPES => {
                let args: ScopesArguments = request.parse_arguments()?;
                let scopes = self.bridge()?.scopes(args.frame_id);
                Ok(Some(serde_json::json!({ "scopes": scopes })))
            }
            requests::VARIABLES => {
                let args: VariablesArguments = request.parse_arguments()?;
                let variables = self.bridge()?.variables(args.variables_reference).await?;
                Ok(Some(serde_json::json!({ "variables": variables })))
            }
            requests::EVALUATE => {
                let args: EvaluateArguments = request.parse_arguments()?;
                let result = self
                    .bridge()?
                    .evaluate(&args.expression, args.context.as_deref())
                    .await?;
                Ok(Some(serde_json::json!({
                    "result": result,
                    "variablesReference": 0,
                })))
            }
            requests::PAUSE => {
                self.bridge()?.pause().await?;
                Ok(None)
            }
            requests::CONTINUE => {
                let args: ThreadIdArguments = request.parse_arguments()?;
                self.bridge()?.resume().await?;
                self.notify_continued(&args).await?;
                Ok(Some(serde_json::json!({ "allThreadsContinued": true })))
            }
            requests::STEP_IN => {
                let args: ThreadIdArguments = request.parse_arguments()?;
                self.bridge()?.step_in().await?;
                self.notify_continued(&args).await?;
                Ok(None)
            }
            requests::STEP_OUT => {
                let args: ThreadIdArguments = request.parse_arguments()?;
                self.bridge()?.step_out().await?;
                self.notify_continued(&args).await?;
                Ok(None)
            }
            requests::NEXT => {
                let args: ThreadIdArguments = request.parse_arguments()?;
                self.bridge()?.step_over().await?;
                self.notify_continued(&args).await?;
                Ok(None)
            }
            requests::DISCONNECT | requests::TERMINATE => Ok(None),
            other => Err(Error::UnsupportedRequest(other.to_string())),
        }
    }

    /// Spawn GDB and wire up the bridge.
    ///
    /// The startup handshake runs in the background so the launch response
    /// is not held up by target bring-up; gated requests wait on the
    /// bridge's readiness signal instead.
    async fn start_session(&mut self, request: &Request) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::Protocol("session already launched".to_string()));
        }
        let config: LaunchConfig = request.parse_arguments()?;
        let (gdb, events) = GdbSession::spawn(&config.gdb_config()).await?;
        let bridge = Arc::new(SessionBridge::new(gdb.dispatcher().clone(), config));

        let event_pump = spawn_event_pump(events, self.writer.clone());
        let startup = bridge.clone();
        tokio::spawn(async move {
            if let Err(err) = startup.run_startup().await {
                error!(error = %err, "startup sequence failed");
            }
        });

        self.session = Some(Session {
            gdb,
            bridge,
            event_pump,
        });
        Ok(())
    }

    /// Resume and step requests announce the target is moving again so
    /// the editor drops its stale stopped state.
    async fn notify_continued(&self, args: &ThreadIdArguments) -> Result<()> {
        let body = ContinuedEventBody {
            thread_id: args.thread_id.unwrap_or_default(),
            all_threads_continued: true,
        };
        self.write(ProtocolMessage::Event(Event::new(
            events::CONTINUED,
            Some(serde_json::to_value(body)?),
        )))
        .await
    }

    fn bridge(&self) -> Result<&Arc<SessionBridge>> {
        self.session
            .as_ref()
            .map(|s| &s.bridge)
            .ok_or(Error::NoSession)
    }

    async fn write(&self, message: ProtocolMessage) -> Result<()> {
        self.writer.lock().await.write_message(message).await
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.gdb.shutdown().await;
            session.event_pump.abort();
        }
    }
}

/// Forward MI session events to the editor as DAP events.
fn spawn_event_pump<W>(
    mut events: mpsc::Receiver<MiEvent>,
    writer: Arc<Mutex<MessageWriter<W>>>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match event {
                MiEvent::Stopped { thread_id } => {
                    let body = StoppedEventBody {
                        reason: "breakpoint".to_string(),
                        thread_id: thread_id as u32,
                        all_threads_stopped: true,
                    };
                    match serde_json::to_value(body) {
                        Ok(body) => Event::new(events::STOPPED, Some(body)),
                        Err(err) => {
                            error!(error = %err, "failed to encode stopped event");
                            continue;
                        }
                    }
                }
                MiEvent::Output { text, kind } => {
                    let category = match kind {
                        StreamKind::Target => "stdout",
                        StreamKind::Console | StreamKind::Log => "console",
                    };
                    let body = OutputEventBody {
                        output: text,
                        category: category.to_string(),
                    };
                    match serde_json::to_value(body) {
                        Ok(body) => Event::new(events::OUTPUT, Some(body)),
                        Err(err) => {
                            error!(error = %err, "failed to encode output event");
                            continue;
                        }
                    }
                }
                MiEvent::Terminated => Event::new(events::TERMINATED, None),
            };

            let terminated = message.event == events::TERMINATED;
            if let Err(err) = writer
                .lock()
                .await
                .write_message(ProtocolMessage::Event(message))
                .await
            {
                warn!(error = %err, "failed to forward event to editor");
                break;
            }
            if terminated {
                break;
            }
        }
        debug!("event pump finished");
    })
}
