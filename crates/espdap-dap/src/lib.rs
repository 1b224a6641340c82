//! Debug Adapter Protocol server for embedded GDB targets.
//!
//! Bridges an editor speaking DAP to a GDB/MI session attached to an
//! ESP32-class target through a GDB server such as OpenOCD:
//!
//! - [`protocol`] / [`transport`] - DAP message types and wire framing
//! - [`server`] - the request loop and the event pump
//! - [`bridge`] - maps DAP requests onto MI commands and shapes replies
//! - [`handles`] - the shared `variablesReference` namespace (packed frame
//!   ids below [`handles::VAR_REF_START`], table handles above)
//! - [`variables`] - the create-once cache of GDB variable objects
//! - [`config`] - launch-request arguments with ESP32 defaults
//!
//! The MI side (subprocess, parser, command dispatch) lives in
//! [`espdap_mi`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod handles;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod variables;

pub use bridge::SessionBridge;
pub use config::LaunchConfig;
pub use error::{Error, Result};
pub use handles::{FrameId, HandleTable, VAR_REF_START};
pub use server::DapServer;
pub use variables::{VariableCache, VariableObject};
