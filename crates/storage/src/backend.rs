//! Object store client trait definition
//!
//! Defines the async interface every object store backend implements:
//! whole-object reads and writes plus the multipart session calls the
//! upload engine drives.

use async_trait::async_trait;
use bytes::Bytes;
use checkpoint_core::{PartResult, PartToken, Result, SessionId, StorageLocation};

/// Async trait for bucket/key object stores
///
/// Implementors must be safe to share across the part-upload workers of a
/// single multipart upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Largest number of parts one multipart upload may contain, if bounded
    fn max_part_count(&self) -> Option<usize> {
        None
    }

    /// Open a multipart upload session targeting `location`
    ///
    /// Nothing becomes visible at `location` until the session is completed.
    async fn create_multipart(&self, location: &StorageLocation) -> Result<SessionId>;

    /// Upload one part of an open session
    ///
    /// # Arguments
    /// * `part_index` - 0-based index of the part within the object
    /// * `data` - Part contents
    ///
    /// # Returns
    /// The token that must be handed back to [`ObjectStore::complete_multipart`]
    ///
    /// # Errors
    /// `TransientUpload` for retryable failures, `FatalUpload` otherwise
    async fn upload_part(
        &self,
        location: &StorageLocation,
        session_id: &str,
        part_index: usize,
        data: Bytes,
    ) -> Result<PartToken>;

    /// Commit a session; `parts` is in strictly increasing chunk index order
    async fn complete_multipart(
        &self,
        location: &StorageLocation,
        session_id: &str,
        parts: &[PartResult],
    ) -> Result<()>;

    /// Release a session and every part uploaded to it
    async fn abort_multipart(&self, location: &StorageLocation, session_id: &str) -> Result<()>;

    /// Read a whole object
    ///
    /// # Errors
    /// `NotFound` if no object exists at `location`
    async fn get_object(&self, location: &StorageLocation) -> Result<Bytes>;

    /// Write a whole object atomically, returning the number of bytes written
    async fn put_object(&self, location: &StorageLocation, data: Bytes) -> Result<u64>;

    /// Delete an object
    ///
    /// # Errors
    /// `NotFound` if no object exists at `location`
    async fn delete_object(&self, location: &StorageLocation) -> Result<()>;

    /// Check if an object exists
    async fn exists(&self, location: &StorageLocation) -> Result<bool>;

    /// List object keys in `bucket` starting with `prefix`, sorted
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}
