//! DAP (Debug Adapter Protocol) message types
//!
//! Based on <https://microsoft.github.io/debug-adapter-protocol/specification>
//!
//! Messages travel as JSON with Content-Length headers:
//! ```text
//! Content-Length: 119\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"launch","arguments":{...}}
//! ```
//!
//! This is the server side of the protocol: requests come in, responses and
//! events go out. Request arguments and response bodies for the supported
//! surface get typed structs; everything else stays `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// Base protocol message - all DAP messages extend this
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

/// Request from the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub seq: i64,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

impl Request {
    /// Deserialize the arguments into a typed struct.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let value = self.arguments.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value)
    }
}

/// Response to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub seq: i64,
    pub request_seq: i64,
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Response {
    pub fn success(request: &Request, body: Option<serde_json::Value>) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            command: request.command.clone(),
            success: true,
            message: None,
            body,
        }
    }

    pub fn error(request: &Request, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            command: request.command.clone(),
            success: false,
            message: Some(message.into()),
            body: None,
        }
    }
}

/// Event notification to the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            seq: 0,
            event: event.into(),
            body,
        }
    }
}

// ============================================================
// REQUEST ARGUMENTS
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadIdArguments {
    #[serde(default)]
    pub thread_id: Option<u32>,
}

// ============================================================
// RESPONSE BODIES
// ============================================================

/// Capabilities advertised in the initialize response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_terminate_request: bool,
    pub support_terminate_debuggee: bool,
    pub supports_delayed_stack_trace_loading: bool,
    pub supports_configuration_done_request: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: u32,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    pub variables_reference: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================
// EVENT BODIES
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    pub thread_id: u32,
    pub all_threads_stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    pub thread_id: u32,
    pub all_threads_continued: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    pub output: String,
    pub category: String,
}

/// DAP event names this server emits
pub mod events {
    pub const INITIALIZED: &str = "initialized";
    pub const STOPPED: &str = "stopped";
    pub const CONTINUED: &str = "continued";
    pub const OUTPUT: &str = "output";
    pub const TERMINATED: &str = "terminated";
}

/// DAP request commands this server understands
pub mod requests {
    pub const INITIALIZE: &str = "initialize";
    pub const LAUNCH: &str = "launch";
    pub const CONFIGURATION_DONE: &str = "configurationDone";
    pub const SET_BREAKPOINTS: &str = "setBreakpoints";
    pub const THREADS: &str = "threads";
    pub const STACK_TRACE: &str = "stackTrace";
    pub const SCOPES: &str = "scopes";
    pub const VARIABLES: &str = "variables";
    pub const EVALUATE: &str = "evaluate";
    pub const PAUSE: &str = "pause";
    pub const CONTINUE: &str = "continue";
    pub const STEP_IN: &str = "stepIn";
    pub const STEP_OUT: &str = "stepOut";
    pub const NEXT: &str = "next";
    pub const DISCONNECT: &str = "disconnect";
    pub const TERMINATE: &str = "terminate";
}
