//! Error types for the MI session layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// GDB answered a command with an `^error` result
    ///
    /// Carries the `msg` field of the error record so callers can surface
    /// it instead of discarding it into a log line.
    #[error("command failed: {message}")]
    Command { message: String },

    /// An MI output line did not match the expected grammar
    #[error("malformed MI output: {0}")]
    Parse(String),

    /// A reply or notification is missing a field the protocol requires
    ///
    /// Use for: a `stopped` notification without a numeric `thread-id`,
    /// a breakpoint reply without a `number`. These are contract violations
    /// of the upstream protocol and must fail loudly.
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    /// Subprocess I/O and lifecycle failures
    ///
    /// Use for: stdin write errors, the GDB process exiting, reply channels
    /// closing because the session tore down.
    #[error("debugger communication error: {0}")]
    Communication(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Communication(err.to_string())
    }
}
