//! Error types for the DAP layer
//!
//! Every session-bridge operation returns `Result`; the server loop is the
//! single point where an error becomes an editor-facing error response, so
//! no failure detail is swallowed into a log line on the way up.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Failure bubbled up from the MI session layer
    #[error(transparent)]
    Mi(#[from] espdap_mi::Error),

    /// DAP message framing/format violations
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON (de)serialization failures
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    /// Request arrived with no live debug session to serve it
    #[error("no active debug session")]
    NoSession,

    /// Request names a capability this adapter does not implement
    #[error("unsupported request: {0}")]
    UnsupportedRequest(String),

    /// A variables reference that resolves to nothing
    #[error("unknown variables reference {0}")]
    InvalidReference(u32),

    /// Thread id or frame level too large for the packed frame encoding
    #[error("frame identifier out of range: thread {thread_id}, level {level} (both must fit 8 bits)")]
    FrameIdOutOfRange { thread_id: u32, level: u32 },

    /// Editor-side transport failures
    #[error("client communication error: {0}")]
    Communication(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidMessage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Communication(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Protocol(format!("invalid UTF-8: {err}"))
    }
}
