//! Core type definitions for multipart checkpoint uploads

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a multipart upload session
pub type SessionId = String;

/// Opaque token returned by the store for an uploaded part (an ETag or similar)
pub type PartToken = String;

/// One contiguous byte range of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the plan, starting at 0
    pub index: usize,

    /// Offset of the first byte within the payload
    pub offset: u64,

    /// Number of bytes in the chunk
    pub length: u64,
}

impl Chunk {
    /// Offset one past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Byte range usable for slicing the payload
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..self.end() as usize
    }
}

/// A successfully uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    /// Index of the chunk this part carries
    pub chunk_index: usize,

    /// Token the store needs to assemble the object
    pub part_token: PartToken,
}

/// Multipart upload session lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// Parts are being uploaded
    Open,

    /// The completion call has been issued
    Completing,

    /// The object is committed and visible
    Committed,

    /// The session was released without producing an object
    Aborted,
}

impl SessionState {
    /// Returns true once no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }

    /// Returns true if moving to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Open, SessionState::Completing)
                | (SessionState::Open, SessionState::Aborted)
                | (SessionState::Completing, SessionState::Committed)
                | (SessionState::Completing, SessionState::Aborted)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "OPEN",
            SessionState::Completing => "COMPLETING",
            SessionState::Committed => "COMMITTED",
            SessionState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}
