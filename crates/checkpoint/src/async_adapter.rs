//! Background checkpoint saves
//!
//! Wraps [`ObjectStoreCheckpointIo`] so `save_checkpoint` returns as soon
//! as the state is encoded. At most one save is in flight per wrapper: a
//! new save first waits for the previous one. A failure of a background
//! save is reported by the next call on the wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use checkpoint_core::{Error, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use crate::adapter::ObjectStoreCheckpointIo;
use crate::codec::CheckpointCodec;
use crate::io::CheckpointIo;

/// Checkpoint IO that uploads on a background task
pub struct AsyncCheckpointIo<C: CheckpointCodec> {
    inner: Arc<ObjectStoreCheckpointIo<C>>,
    pending: Mutex<Option<JoinHandle<Result<u64>>>>,
}

impl<C: CheckpointCodec> AsyncCheckpointIo<C> {
    /// Wrap an adapter; the wrapper becomes its only user
    pub fn new(inner: ObjectStoreCheckpointIo<C>) -> Self {
        Self {
            inner: Arc::new(inner),
            pending: Mutex::new(None),
        }
    }

    /// The wrapped adapter
    pub fn inner(&self) -> &ObjectStoreCheckpointIo<C> {
        &self.inner
    }

    /// Wait for the in-flight save, if any, and report its outcome
    #[instrument(skip(self))]
    pub async fn wait_for_pending(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        join_save(&mut pending).await
    }
}

/// Join the save held in `slot`
///
/// The handle stays in the slot until the task has finished, so a caller
/// dropped mid-wait leaves the save tracked for the next call.
async fn join_save(slot: &mut Option<JoinHandle<Result<u64>>>) -> Result<()> {
    let Some(handle) = slot.as_mut() else {
        return Ok(());
    };
    let joined = handle.await;
    *slot = None;

    match joined {
        Ok(Ok(size)) => {
            debug!(size_bytes = size, "Background save finished");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Background checkpoint save failed");
            Err(e)
        }
        Err(e) => Err(Error::Internal {
            message: format!("background save task failed: {}", e),
        }),
    }
}

#[async_trait]
impl<C: CheckpointCodec> CheckpointIo for AsyncCheckpointIo<C> {
    type State = C::State;

    async fn save_checkpoint(&self, state: &C::State, path: &str) -> Result<()> {
        // Encode now so the caller may keep mutating its state.
        let payload = self.inner.codec().encode(state)?;

        let mut pending = self.pending.lock().await;
        let previous = join_save(&mut pending).await;
        if self.inner.is_torn_down() {
            previous?;
            return Err(Error::TornDown);
        }

        let inner = self.inner.clone();
        let path = path.to_string();
        *pending = Some(tokio::spawn(async move {
            inner.save_payload(payload, &path).await
        }));
        debug!("Submitted background save");

        previous
    }

    async fn load_checkpoint(&self, path: &str) -> Result<C::State> {
        self.wait_for_pending().await?;
        self.inner.load_checkpoint(path).await
    }

    async fn remove_checkpoint(&self, path: &str) -> Result<()> {
        self.wait_for_pending().await?;
        self.inner.remove_checkpoint(path).await
    }

    async fn teardown(&self) -> Result<()> {
        let drained = self.wait_for_pending().await;
        self.inner.teardown().await?;
        drained
    }
}
