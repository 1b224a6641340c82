//! Typed record model for GDB/MI output
//!
//! MI output falls into three categories:
//!
//! - **Result records** (`^done`, `^error`, ...) - the direct reply to a
//!   command, optionally prefixed with the command's token
//! - **Async notifications** (`*stopped`, `=thread-created`, ...) -
//!   unsolicited execution-state and environment notifications
//! - **Stream records** (`~"..."`, `@"..."`, `&"..."`) - raw text output
//!   from the console, the target, or GDB's own log
//!
//! Reply payloads are opaque string-keyed data as far as this layer is
//! concerned; [`MiValue`] models them as strings, tuples, and lists without
//! interpreting them.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// An MI field value: a c-string, a `{...}` tuple, or a `[...]` list.
///
/// MI lists may contain bare values or `name=value` pairs; pairs inside a
/// list are kept as single-entry tuples so callers can look the name up.
#[derive(Debug, Clone, PartialEq)]
pub enum MiValue {
    String(String),
    Tuple(HashMap<String, MiValue>),
    List(Vec<MiValue>),
}

impl MiValue {
    /// Empty tuple, used for records that carry no fields.
    pub fn empty() -> Self {
        MiValue::Tuple(HashMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MiValue]> {
        match self {
            MiValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup on a tuple value.
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(fields) => fields.get(key),
            _ => None,
        }
    }

    /// String field lookup on a tuple value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MiValue::as_str)
    }

    /// String field lookup that fails loudly when the field is absent.
    pub fn expect_str(&self, key: &'static str) -> Result<&str> {
        self.get_str(key).ok_or(Error::MissingField(key))
    }

    /// Numeric field lookup; a present but non-numeric field is an error.
    pub fn expect_u64(&self, key: &'static str) -> Result<u64> {
        self.expect_str(key)?
            .parse()
            .map_err(|_| Error::MissingField(key))
    }
}

impl std::fmt::Display for MiValue {
    /// MI-flavoured rendering, used when a raw reply payload is shown to
    /// the user (REPL evaluation).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiValue::String(s) => write!(f, "{s}"),
            MiValue::Tuple(fields) => {
                let mut entries: Vec<_> = fields.iter().collect();
                entries.sort_by_key(|(k, _)| k.as_str());
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                write!(f, "}}")
            }
            MiValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Result class of a reply record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "done" => Ok(ResultClass::Done),
            "running" => Ok(ResultClass::Running),
            "connected" => Ok(ResultClass::Connected),
            "error" => Ok(ResultClass::Error),
            "exit" => Ok(ResultClass::Exit),
            other => Err(Error::Parse(format!("unknown result class `{other}`"))),
        }
    }
}

/// Direct reply to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Token echoed from the command line, if the command carried one
    pub token: Option<u64>,
    pub class: ResultClass,
    /// Opaque string-keyed payload (always a tuple)
    pub fields: MiValue,
}

impl ResultRecord {
    /// Error message of an `^error` reply, if present.
    pub fn error_message(&self) -> Option<&str> {
        self.fields.get_str("msg")
    }
}

/// Unsolicited notification (`*running`, `*stopped`, `=breakpoint-modified`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyRecord {
    pub class: String,
    pub fields: MiValue,
}

/// Stream record source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` - console output intended for the user
    Console,
    /// `@` - output from the remote target
    Target,
    /// `&` - GDB's own log/echo output
    Log,
}

/// Raw text output record.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub text: String,
}

/// One classified line of MI output.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Result(ResultRecord),
    Notify(NotifyRecord),
    Stream(StreamRecord),
}
