//! Synchronous checkpoint IO for non-async training loops

use std::time::Duration;

use checkpoint_core::{CheckpointConfig, Error, Result};
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

use crate::adapter::ObjectStoreCheckpointIo;
use crate::async_adapter::AsyncCheckpointIo;
use crate::codec::CheckpointCodec;
use crate::io::CheckpointIo;

/// Runtime settings for [`BlockingCheckpointIo`]
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Tokio worker threads driving uploads
    pub worker_threads: usize,

    /// Name given to runtime threads
    pub thread_name: String,

    /// How long drop waits for runtime tasks to finish
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            thread_name: "checkpoint-io".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Blocking facade over [`AsyncCheckpointIo`] with its own tokio runtime
///
/// Saves still run in the background on the owned runtime. Must not be
/// created, used or dropped from inside another tokio runtime.
pub struct BlockingCheckpointIo<C: CheckpointCodec> {
    io: AsyncCheckpointIo<C>,
    runtime: Option<Runtime>,
    shutdown_timeout: Duration,
}

impl<C: CheckpointCodec> BlockingCheckpointIo<C> {
    /// Build the runtime and an adapter whose store comes from `config`
    pub fn new(config: CheckpointConfig, codec: C, options: RuntimeOptions) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .enable_all()
            .thread_name(options.thread_name.clone())
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to build Tokio runtime: {}", e),
            })?;

        let adapter = runtime.block_on(ObjectStoreCheckpointIo::new(config, codec))?;
        info!(
            worker_threads = options.worker_threads,
            thread_name = %options.thread_name,
            "Blocking checkpoint IO started"
        );

        Ok(Self {
            io: AsyncCheckpointIo::new(adapter),
            runtime: Some(runtime),
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output> {
        self.runtime
            .as_ref()
            .map(|runtime| runtime.block_on(future))
            .ok_or(Error::TornDown)
    }

    /// Submit a save; returns once the state is encoded
    pub fn save_checkpoint(&self, state: &C::State, path: &str) -> Result<()> {
        self.block_on(self.io.save_checkpoint(state, path))?
    }

    pub fn load_checkpoint(&self, path: &str) -> Result<C::State> {
        self.block_on(self.io.load_checkpoint(path))?
    }

    pub fn remove_checkpoint(&self, path: &str) -> Result<()> {
        self.block_on(self.io.remove_checkpoint(path))?
    }

    /// Block until the in-flight save, if any, has finished
    pub fn wait_for_pending(&self) -> Result<()> {
        self.block_on(self.io.wait_for_pending())?
    }

    pub fn teardown(&self) -> Result<()> {
        self.block_on(self.io.teardown())?
    }
}

impl<C: CheckpointCodec> Drop for BlockingCheckpointIo<C> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            if let Err(e) = runtime.block_on(self.io.wait_for_pending()) {
                warn!(error = %e, "Pending checkpoint save failed during shutdown");
            }

            // Give tasks time to clean up
            runtime.shutdown_timeout(self.shutdown_timeout);
            info!("Blocking checkpoint IO shut down");
        }
    }
}
