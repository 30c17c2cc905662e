//! Error types for checkpoint IO against object storage

use thiserror::Error;

/// Result type alias using the checkpoint Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for checkpoint save/load/remove
#[derive(Error, Debug)]
pub enum Error {
    // Location errors
    #[error("Invalid storage location '{uri}': {reason}")]
    InvalidLocation { uri: String, reason: String },

    // Upload errors
    #[error("Transient failure uploading part {part}: {message}")]
    TransientUpload { part: usize, message: String },

    #[error("Part {part} failed after {attempts} attempt(s): {message}")]
    FatalUpload {
        part: usize,
        attempts: u32,
        message: String,
    },

    #[error("Multipart upload to {location} aborted: {source}{}", abort_suffix(.abort_error))]
    UploadAborted {
        location: String,
        #[source]
        source: Box<Error>,
        abort_error: Option<Box<Error>>,
    },

    #[error("Upload session {session_id} cannot move from {from} to {to}")]
    InvalidSessionTransition {
        session_id: String,
        from: String,
        to: String,
    },

    // Object errors
    #[error("Object not found: {location}")]
    NotFound { location: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Lifecycle errors
    #[error("Checkpoint IO has been torn down")]
    TornDown,

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn abort_suffix(abort_error: &Option<Box<Error>>) -> String {
    match abort_error {
        Some(e) => format!(" (abort also failed: {})", e),
        None => String::new(),
    }
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientUpload { .. } | Error::Storage { .. })
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FatalUpload { .. }
                | Error::UploadAborted { .. }
                | Error::InvalidConfig { .. }
                | Error::InvalidSessionTransition { .. }
                | Error::Internal { .. }
        )
    }

    /// Returns true if the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Convert into the fatal form reported for a single part
    pub fn into_fatal_part(self, part: usize, attempts: u32) -> Error {
        match self {
            e @ Error::FatalUpload { .. } => e,
            other => Error::FatalUpload {
                part,
                attempts,
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
