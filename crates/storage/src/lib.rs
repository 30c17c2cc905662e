//! Storage - Object store backends and the parallel multipart upload engine
//!
//! Provides async object storage with support for:
//! - In-memory store (tests and single-process use)
//! - Local filesystem (default feature)
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! Large payloads are split by [`plan_chunks`] and uploaded concurrently
//! by [`MultipartUploadCoordinator`], which commits the object only after
//! every part succeeds and aborts the session otherwise.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use checkpoint_core::{RetryConfig, StorageLocation};
//! use storage::{LocalObjectStore, MultipartUploadCoordinator};
//!
//! # async fn example() -> checkpoint_core::Result<()> {
//! let store = Arc::new(LocalObjectStore::new("/tmp/checkpoints"));
//! let coordinator =
//!     MultipartUploadCoordinator::new(store, RetryConfig::default(), 8 * 1024 * 1024, 8)?;
//! let target = StorageLocation::parse("file://models/epoch-1.ckpt")?;
//! coordinator.upload(&target, Bytes::from(vec![0u8; 64 * 1024 * 1024])).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;
mod memory;
mod multipart;
mod part;
mod planner;
mod retry;
mod session;

#[cfg(feature = "s3")]
mod s3;

use std::sync::Arc;

use checkpoint_core::{Result, StoreConfig};
use tracing::{info, warn};

pub use backend::ObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use multipart::MultipartUploadCoordinator;
pub use part::{PartTable, PartUploader};
pub use planner::plan_chunks;
pub use session::UploadSession;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

/// Build the object store selected by `config`
///
/// # Errors
/// `InvalidConfig` if the S3 backend is requested without the `s3` feature
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StoreConfig::Memory => {
            warn!("Using the in-memory object store; checkpoints will not survive this process");
            Arc::new(MemoryObjectStore::new())
        }
        StoreConfig::Local { root } => Arc::new(LocalObjectStore::new(root)),
        #[cfg(feature = "s3")]
        StoreConfig::S3 {
            region,
            endpoint,
            force_path_style,
        } => Arc::new(
            S3ObjectStore::with_config(S3Config {
                region: region.clone(),
                endpoint_url: endpoint.clone(),
                force_path_style: *force_path_style,
            })
            .await?,
        ),
        #[cfg(not(feature = "s3"))]
        StoreConfig::S3 { .. } => {
            return Err(checkpoint_core::Error::InvalidConfig {
                message: "S3 backend requires the `s3` feature".to_string(),
            })
        }
    };

    info!(backend = store.name(), "Object store ready");
    Ok(store)
}
