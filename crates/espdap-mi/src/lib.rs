//! GDB machine-interface (MI) session layer.
//!
//! This crate owns everything that talks to the GDB subprocess:
//!
//! - [`record`] - the typed record model for MI output (results, async
//!   notifications, stream output)
//! - [`parser`] - turns raw MI output lines into records
//! - [`dispatcher`] - the ordered command queue with a single in-flight
//!   command and token-correlated replies
//! - [`exec_state`] - tracks whether the target is running or stopped,
//!   derived purely from notification traffic
//! - [`process`] - GDB subprocess lifecycle and the stdout reader task
//!
//! The MI protocol accepts exactly one outstanding command at a time and
//! answers on a shared output stream, so the dispatcher serializes all
//! commands and gates dispatch on the target's execution state.

pub mod dispatcher;
pub mod error;
pub mod exec_state;
pub mod parser;
pub mod process;
pub mod record;

pub use dispatcher::{CommandDispatcher, DispatcherConfig};
pub use error::{Error, Result};
pub use exec_state::{ExecState, ExecStateTracker};
pub use process::{GdbConfig, GdbSession, MiEvent};
pub use record::{MiValue, NotifyRecord, Record, ResultClass, ResultRecord, StreamKind, StreamRecord};
