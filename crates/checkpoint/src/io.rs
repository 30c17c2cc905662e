//! Framework-facing checkpoint IO capability

use async_trait::async_trait;
use checkpoint_core::Result;

/// Save, load and remove checkpoints addressed by `scheme://bucket/key` paths
///
/// Implemented by the object-store adapter and by the asynchronous wrapper
/// around it, so training code can switch between them freely.
#[async_trait]
pub trait CheckpointIo: Send + Sync {
    /// In-memory checkpoint state
    type State: Send + Sync;

    /// Persist `state` at `path`
    ///
    /// Either the whole checkpoint becomes visible at `path` or nothing does.
    async fn save_checkpoint(&self, state: &Self::State, path: &str) -> Result<()>;

    /// Read back the checkpoint stored at `path`
    ///
    /// # Errors
    /// `NotFound` if no checkpoint exists at `path`
    async fn load_checkpoint(&self, path: &str) -> Result<Self::State>;

    /// Delete the checkpoint stored at `path`
    ///
    /// # Errors
    /// `NotFound` if no checkpoint exists at `path`
    async fn remove_checkpoint(&self, path: &str) -> Result<()>;

    /// Release held resources; calling it again is a no-op
    async fn teardown(&self) -> Result<()>;
}
