//! Multipart upload session lifecycle

use checkpoint_core::{Error, Result, SessionId, SessionState, StorageLocation};
use parking_lot::Mutex;
use tracing::debug;

/// A multipart upload session opened against one target object
///
/// Part uploaders only read the id and target; state transitions are
/// reserved to the coordinator that opened the session.
#[derive(Debug)]
pub struct UploadSession {
    id: SessionId,
    target: StorageLocation,
    state: Mutex<SessionState>,
}

impl UploadSession {
    /// Wrap a freshly opened session
    pub fn open(id: SessionId, target: StorageLocation) -> Self {
        Self {
            id,
            target,
            state: Mutex::new(SessionState::Open),
        }
    }

    /// Store-assigned session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Object the session will produce on completion
    pub fn target(&self) -> &StorageLocation {
        &self.target
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next`, rejecting any non-monotonic transition
    pub(crate) fn transition(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(Error::InvalidSessionTransition {
                session_id: self.id.clone(),
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        let from = *state;
        debug!(session_id = %self.id, %from, to = %next, "Session transition");
        *state = next;
        Ok(())
    }
}
