//! Checkpoint Core - Foundation for object-store checkpoint IO
//!
//! Provides the shared data model, configuration and error handling
//! used by the storage backends, the multipart upload engine and the
//! framework-facing checkpoint adapters.

pub mod config;
pub mod error;
pub mod location;
pub mod types;

pub use config::{CheckpointConfig, RetryConfig, StoreConfig};
pub use error::{Error, Result};
pub use location::StorageLocation;
pub use types::*;
