//! Target execution-state tracking
//!
//! The target's running/stopped state is derived purely from async
//! notification traffic; result and stream records never touch it. The
//! dispatcher reads the state to decide whether the next queued command may
//! be sent, and the session layer turns post-startup stop transitions into
//! editor-facing stopped events.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::debug;

use crate::error::Result;
use crate::record::NotifyRecord;

/// Whether the target is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    Stopped,
}

/// Derives [`ExecState`] from notification records.
///
/// Stop events are suppressed until [`mark_startup_complete`] is called:
/// the startup handshake itself stops and resumes the target several times
/// and none of those transitions belong in the editor.
///
/// [`mark_startup_complete`]: ExecStateTracker::mark_startup_complete
pub struct ExecStateTracker {
    state: watch::Sender<ExecState>,
    startup_complete: AtomicBool,
}

impl ExecStateTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ExecState::Stopped);
        Self {
            state,
            startup_complete: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ExecState {
        *self.state.borrow()
    }

    /// Watch handle for the dispatcher's gating logic.
    pub fn subscribe(&self) -> watch::Receiver<ExecState> {
        self.state.subscribe()
    }

    pub fn mark_startup_complete(&self) {
        self.startup_complete.store(true, Ordering::SeqCst);
    }

    pub fn is_startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    /// Force the state to Stopped without a notification.
    ///
    /// `exec-interrupt` must be dispatchable while the target is running,
    /// which the normal gating forbids; the interrupt path clears the state
    /// up front and lets the subsequent `*stopped` notification confirm it.
    pub fn force_stopped(&self) {
        self.state.send_replace(ExecState::Stopped);
    }

    /// Consume one notification record.
    ///
    /// Returns `Some(thread_id)` when the transition should surface as a
    /// stop event, i.e. a `stopped` notification after startup completed.
    /// A `stopped` notification without a numeric `thread-id` violates the
    /// MI contract and fails loudly.
    pub fn observe(&self, notify: &NotifyRecord) -> Result<Option<u64>> {
        match notify.class.as_str() {
            "running" => {
                self.state.send_replace(ExecState::Running);
                Ok(None)
            }
            "stopped" => {
                self.state.send_replace(ExecState::Stopped);
                if self.is_startup_complete() {
                    let thread_id = notify.fields.expect_u64("thread-id")?;
                    Ok(Some(thread_id))
                } else {
                    debug!(class = %notify.class, "suppressing stop event before startup completion");
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }
}

impl Default for ExecStateTracker {
    fn default() -> Self {
        Self::new()
    }
}
