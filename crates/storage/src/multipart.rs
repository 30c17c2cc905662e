//! Parallel multipart upload coordination
//!
//! Fans the chunks of one payload out over a bounded pool of part-upload
//! workers and commits the object only when every part has landed. Any
//! fatal part failure aborts the session so no partial object or orphaned
//! upload is left behind.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use checkpoint_core::{
    CheckpointConfig, Chunk, Error, PartResult, Result, RetryConfig, SessionState,
    StorageLocation,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::part::{PartTable, PartUploader};
use crate::planner::plan_chunks;
use crate::retry::with_retry;
use crate::session::UploadSession;
use crate::ObjectStore;

/// Uploads payloads as multipart objects with bounded parallelism
#[derive(Clone)]
pub struct MultipartUploadCoordinator {
    store: Arc<dyn ObjectStore>,
    uploader: PartUploader,
    retry: RetryConfig,
    chunk_size: u64,
    max_parallelism: usize,
}

impl MultipartUploadCoordinator {
    /// Create a coordinator
    ///
    /// # Arguments
    /// * `chunk_size` - Bytes per part
    /// * `max_parallelism` - Upper bound on concurrent part uploads
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retry: RetryConfig,
        chunk_size: u64,
        max_parallelism: usize,
    ) -> Result<Self> {
        if chunk_size == 0 || max_parallelism == 0 {
            return Err(Error::InvalidConfig {
                message: format!(
                    "chunk_size ({}) and max_parallelism ({}) must be greater than zero",
                    chunk_size, max_parallelism
                ),
            });
        }

        Ok(Self {
            uploader: PartUploader::new(store.clone(), retry.clone()),
            store,
            retry,
            chunk_size,
            max_parallelism,
        })
    }

    /// Create a coordinator from checkpoint configuration
    pub fn from_config(store: Arc<dyn ObjectStore>, config: &CheckpointConfig) -> Result<Self> {
        Self::new(
            store,
            config.retry.clone(),
            config.chunk_size,
            config.max_parallelism,
        )
    }

    /// Bytes per part
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Upper bound on concurrent part uploads
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Upload `payload` to `target` as one multipart object
    ///
    /// # Returns
    /// Number of bytes committed
    ///
    /// # Errors
    /// `UploadAborted` wrapping the first fatal cause if any part or the
    /// completion call fails; the session has been aborted by then.
    #[instrument(
        skip(self, payload),
        fields(backend = self.store.name(), location = %target, size = payload.len())
    )]
    pub async fn upload(&self, target: &StorageLocation, payload: Bytes) -> Result<u64> {
        let start = Instant::now();
        let size = payload.len() as u64;
        let chunks = plan_chunks(size, self.chunk_size)?;

        if let Some(max_parts) = self.store.max_part_count() {
            if chunks.len() > max_parts {
                return Err(Error::InvalidConfig {
                    message: format!(
                        "{} parts of {} bytes exceed the backend limit of {} parts",
                        chunks.len(),
                        self.chunk_size,
                        max_parts
                    ),
                });
            }
        }

        let session_id = self.store.create_multipart(target).await?;
        let session = Arc::new(UploadSession::open(session_id, target.clone()));
        let _guard = SessionGuard {
            store: self.store.clone(),
            session: session.clone(),
        };

        debug!(
            session_id = %session.id(),
            parts = chunks.len(),
            "Started multipart upload"
        );

        let parts = match self.upload_parts(&session, chunks, payload).await {
            Ok(parts) => parts,
            Err(cause) => return Err(self.abort(&session, cause).await),
        };

        session.transition(SessionState::Completing)?;
        let completed = with_retry(&self.retry, "complete_multipart", || {
            self.store
                .complete_multipart(session.target(), session.id(), &parts)
        })
        .await;

        if let Err(failure) = completed {
            return Err(self.abort(&session, failure.error).await);
        }
        session.transition(SessionState::Committed)?;

        let elapsed = start.elapsed();
        info!(
            session_id = %session.id(),
            parts = parts.len(),
            size_bytes = size,
            elapsed_ms = elapsed.as_millis() as u64,
            throughput_mbps = (size as f64 / 1024.0 / 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON),
            "Multipart upload committed"
        );

        Ok(size)
    }

    /// Run the worker pool and return parts in chunk index order
    async fn upload_parts(
        &self,
        session: &Arc<UploadSession>,
        chunks: Vec<Chunk>,
        payload: Bytes,
    ) -> Result<Vec<PartResult>> {
        let workers = self.max_parallelism.min(chunks.len());
        let queue = Arc::new(WorkQueue::new(chunks, payload));

        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            join_set.spawn(run_worker(
                worker,
                self.uploader.clone(),
                session.clone(),
                queue.clone(),
            ));
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(Error::Internal {
                    message: format!("part upload worker panicked: {}", e),
                }),
            };

            if let Err(e) = outcome {
                if first_error.is_none() {
                    queue.cancel();
                    join_set.abort_all();
                    first_error = Some(e);
                } else {
                    debug!(error = %e, "Discarding secondary part failure");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => queue.table.ordered(),
        }
    }

    /// Abort the session and build the error reported to the caller
    async fn abort(&self, session: &UploadSession, cause: Error) -> Error {
        warn!(
            session_id = %session.id(),
            location = %session.target(),
            error = %cause,
            "Aborting multipart upload"
        );

        let aborted = with_retry(&self.retry, "abort_multipart", || {
            self.store.abort_multipart(session.target(), session.id())
        })
        .await;

        let abort_error = match aborted {
            Ok(()) => None,
            Err(failure) => {
                error!(
                    session_id = %session.id(),
                    error = %failure.error,
                    "Failed to abort multipart upload"
                );
                Some(Box::new(failure.error))
            }
        };

        if let Err(e) = session.transition(SessionState::Aborted) {
            warn!(error = %e, "Session already finished when aborting");
        }

        Error::UploadAborted {
            location: session.target().to_string(),
            source: Box::new(cause),
            abort_error,
        }
    }
}

/// Chunks shared by the workers of one upload
struct WorkQueue {
    chunks: Vec<Chunk>,
    payload: Bytes,
    cursor: AtomicUsize,
    cancelled: AtomicBool,
    table: PartTable,
}

impl WorkQueue {
    fn new(chunks: Vec<Chunk>, payload: Bytes) -> Self {
        Self {
            table: PartTable::new(chunks.len()),
            chunks,
            payload,
            cursor: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Claim the next chunk, or `None` once drained or cancelled
    fn next(&self) -> Option<&Chunk> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.chunks.get(self.cursor.fetch_add(1, Ordering::SeqCst))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Upload chunks until the queue is drained or a part fails fatally
async fn run_worker(
    worker: usize,
    uploader: PartUploader,
    session: Arc<UploadSession>,
    queue: Arc<WorkQueue>,
) -> Result<()> {
    while let Some(chunk) = queue.next() {
        let data = queue.payload.slice(chunk.range());
        match uploader.upload_part(&session, chunk, data).await {
            Ok(part) => queue.table.insert(part)?,
            Err(e) => {
                queue.cancel();
                debug!(worker, part = chunk.index, "Worker stopping after fatal error");
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Aborts a session that is dropped before reaching a terminal state
///
/// Covers cancellation of the upload future and panics between opening
/// and finishing the session.
struct SessionGuard {
    store: Arc<dyn ObjectStore>,
    session: Arc<UploadSession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.state().is_terminal() {
            return;
        }

        let _ = self.session.transition(SessionState::Aborted);
        let store = self.store.clone();
        let session = self.session.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    session_id = %session.id(),
                    "Upload dropped before completion, aborting session"
                );
                handle.spawn(async move {
                    if let Err(e) = store.abort_multipart(session.target(), session.id()).await {
                        warn!(session_id = %session.id(), error = %e, "Best-effort abort failed");
                    }
                });
            }
            Err(_) => {
                error!(
                    session_id = %session.id(),
                    "Upload dropped outside a runtime, session left open"
                );
            }
        }
    }
}
