//! Single-part upload with retry, and the per-index result table

use std::sync::Arc;

use bytes::Bytes;
use checkpoint_core::{Chunk, Error, PartResult, PartToken, Result, RetryConfig};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::retry::with_retry;
use crate::session::UploadSession;
use crate::ObjectStore;

/// Uploads one chunk as one part of a multipart session
///
/// Transient failures are retried internally; callers only ever see a
/// `PartResult` or a `FatalUpload` error.
#[derive(Clone)]
pub struct PartUploader {
    store: Arc<dyn ObjectStore>,
    retry: RetryConfig,
}

impl PartUploader {
    /// Create an uploader sharing `store` across workers
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Upload `data` as the part for `chunk`
    #[instrument(
        skip(self, session, data),
        fields(session_id = %session.id(), part = chunk.index, size = chunk.length)
    )]
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        chunk: &Chunk,
        data: Bytes,
    ) -> Result<PartResult> {
        if data.len() as u64 != chunk.length {
            return Err(Error::FatalUpload {
                part: chunk.index,
                attempts: 0,
                message: format!(
                    "part data is {} bytes but chunk expects {}",
                    data.len(),
                    chunk.length
                ),
            });
        }

        let outcome = with_retry(&self.retry, "upload_part", || {
            let data = data.clone();
            async move {
                self.store
                    .upload_part(session.target(), session.id(), chunk.index, data)
                    .await
            }
        })
        .await;

        match outcome {
            Ok(part_token) => {
                debug!(part = chunk.index, "Uploaded part");
                Ok(PartResult {
                    chunk_index: chunk.index,
                    part_token,
                })
            }
            Err(failure) => {
                warn!(
                    part = chunk.index,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Part upload failed"
                );
                Err(failure.error.into_fatal_part(chunk.index, failure.attempts))
            }
        }
    }
}

/// Write-once-per-index collection of part results
#[derive(Debug)]
pub struct PartTable {
    slots: Mutex<Vec<Option<PartToken>>>,
}

impl PartTable {
    /// Create a table expecting `count` parts
    pub fn new(count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; count]),
        }
    }

    /// Record a part; each index may be written exactly once
    pub fn insert(&self, result: PartResult) -> Result<()> {
        let mut slots = self.slots.lock();
        let expected = slots.len();
        let slot = slots
            .get_mut(result.chunk_index)
            .ok_or_else(|| Error::Internal {
                message: format!(
                    "part index {} out of range for {} parts",
                    result.chunk_index, expected
                ),
            })?;

        if slot.is_some() {
            return Err(Error::Internal {
                message: format!("part {} recorded twice", result.chunk_index),
            });
        }

        *slot = Some(result.part_token);
        Ok(())
    }

    /// Number of parts recorded so far
    pub fn filled(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Parts ordered by chunk index; fails unless every index is present
    pub fn ordered(&self) -> Result<Vec<PartResult>> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .map(|(chunk_index, token)| {
                token
                    .clone()
                    .map(|part_token| PartResult {
                        chunk_index,
                        part_token,
                    })
                    .ok_or_else(|| Error::Internal {
                        message: format!("part {} missing at completion", chunk_index),
                    })
            })
            .collect()
    }
}
