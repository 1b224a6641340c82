//! Resource handle tables
//!
//! The DAP `variablesReference` field is one opaque integer namespace, so
//! frame references and variable-object handles share it, partitioned by
//! magnitude: values below [`VAR_REF_START`] are packed frame identifiers,
//! values at or above it are handles into a [`HandleTable`].
//!
//! Frame references need no storage at all: thread id and frame level pack
//! into 16 bits. Variable-object handles are backed by a table keyed by the
//! object's identity string; one identity maps to exactly one handle for
//! the table's lifetime and handles are never reused.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// First handle value used for variable objects (256 * 256).
///
/// Everything below is frame-reference space: 8 bits of thread id, 8 bits
/// of frame level.
pub const VAR_REF_START: u32 = 65536;

/// A stack frame identity packed into a single reference integer.
///
/// Encoding: `thread_id << 8 | level`. Both components are validated to
/// fit 8 bits; anything larger would silently corrupt the packing and
/// collide with neighbouring frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId {
    thread_id: u32,
    level: u32,
}

impl FrameId {
    pub fn new(thread_id: u32, level: u32) -> Result<Self> {
        if thread_id > 0xff || level > 0xff {
            return Err(Error::FrameIdOutOfRange { thread_id, level });
        }
        Ok(Self { thread_id, level })
    }

    pub fn thread_id(self) -> u32 {
        self.thread_id
    }

    pub fn level(self) -> u32 {
        self.level
    }

    pub fn pack(self) -> u32 {
        self.thread_id << 8 | self.level
    }

    pub fn unpack(reference: u32) -> Result<Self> {
        if reference >= VAR_REF_START {
            return Err(Error::InvalidReference(reference));
        }
        Ok(Self {
            thread_id: (reference >> 8) & 0xff,
            level: reference & 0xff,
        })
    }
}

/// Bidirectional handle ⟷ identity map.
///
/// Forward: handle → value. Reverse: identity string → handle. Repeated
/// requests for the same identity observe the same handle and the same
/// underlying value.
#[derive(Debug)]
pub struct HandleTable<T> {
    next_handle: u32,
    forward: HashMap<u32, T>,
    reverse: HashMap<String, u32>,
}

impl<T> HandleTable<T> {
    /// `start` partitions this table's range within the shared reference
    /// namespace.
    pub fn new(start: u32) -> Self {
        Self {
            next_handle: start,
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Register a value under a fresh handle. The identity must not
    /// already be present; use [`handle_of`](Self::handle_of) first.
    pub fn create(&mut self, identity: impl Into<String>, value: T) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.forward.insert(handle, value);
        self.reverse.insert(identity.into(), handle);
        handle
    }

    pub fn get(&self, handle: u32) -> Option<&T> {
        self.forward.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        self.forward.get_mut(&handle)
    }

    pub fn handle_of(&self, identity: &str) -> Option<u32> {
        self.reverse.get(identity).copied()
    }

    pub fn get_by_identity(&self, identity: &str) -> Option<(u32, &T)> {
        let handle = self.handle_of(identity)?;
        Some((handle, self.forward.get(&handle)?))
    }

    pub fn get_mut_by_identity(&mut self, identity: &str) -> Option<&mut T> {
        let handle = self.handle_of(identity)?;
        self.forward.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
