//! Local filesystem object store
//!
//! Maps each bucket to a directory under a root and provides:
//! - Atomic object writes (write to .tmp, then rename)
//! - Multipart sessions staged under `<root>/.multipart/<session>/`,
//!   tracked only while open
//! - Completion that concatenates staged parts into a temp file and renames
//!   it into place, so readers never observe a partial object

use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use checkpoint_core::{
    Error, PartResult, PartToken, Result, SessionId, StorageLocation,
};
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::ObjectStore;

/// Directory under the root that holds staged multipart parts
const STAGING_DIR: &str = ".multipart";

#[derive(Debug)]
struct LocalSession {
    location: StorageLocation,
    parts: BTreeMap<usize, PartToken>,
}

/// Local filesystem object store
#[derive(Debug)]
pub struct LocalObjectStore {
    /// Root directory; buckets are its subdirectories
    root: PathBuf,

    /// Open sessions; committed and aborted ones are dropped
    sessions: DashMap<SessionId, LocalSession>,
}

impl LocalObjectStore {
    /// Create a new LocalObjectStore instance
    ///
    /// # Arguments
    /// * `root` - Directory to use as the storage root
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sessions: DashMap::new(),
        }
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location to a file path, rejecting keys that escape the bucket
    fn object_path(&self, location: &StorageLocation) -> Result<PathBuf> {
        location.require_key()?;

        let invalid = |reason: &str| Error::InvalidLocation {
            uri: location.to_string(),
            reason: reason.to_string(),
        };

        if location.bucket.starts_with('.') {
            return Err(invalid("bucket names starting with '.' are reserved"));
        }

        let key = Path::new(&location.key);
        if !key.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(invalid("key must be a relative path without '..'"));
        }

        Ok(self.root.join(&location.bucket).join(key))
    }

    fn staging_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(session_id)
    }

    fn part_path(&self, session_id: &str, part_index: usize) -> PathBuf {
        self.staging_dir(session_id)
            .join(format!("part-{:05}", part_index))
    }

    /// Generate a unique temporary file path next to `path`
    fn temp_path(path: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        path.with_file_name(temp_name)
    }

    fn unknown_session(session_id: &str) -> Error {
        Error::Storage {
            message: format!("no such upload session: {}", session_id),
        }
    }

    fn check_open(&self, session_id: &str, location: &StorageLocation) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;

        if &session.location != location {
            return Err(Error::Internal {
                message: format!(
                    "session {} targets {}, not {}",
                    session_id, session.location, location
                ),
            });
        }
        Ok(())
    }

    /// Write `data` to `path` via a temp file and rename
    async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = Self::temp_path(path);
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        written
    }

    /// Concatenate staged parts into the final object
    async fn assemble(&self, session_id: &str, parts: &[PartResult], target: &Path) -> Result<u64> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = Self::temp_path(target);
        let assembled = async {
            let mut out = fs::File::create(&temp_path).await?;
            let mut size = 0u64;
            for part in parts {
                let data = fs::read(self.part_path(session_id, part.chunk_index)).await?;
                out.write_all(&data).await?;
                size += data.len() as u64;
            }
            out.sync_all().await?;
            drop(out);
            fs::rename(&temp_path, target).await?;
            Ok::<_, io::Error>(size)
        }
        .await;

        match assembled {
            Ok(size) => Ok(size),
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(Error::Storage {
                    message: format!("Failed to assemble {:?}: {}", target, e),
                })
            }
        }
    }
}

/// Map a failed part write to a transient or fatal part error
fn part_write_error(part: usize, err: io::Error) -> Error {
    let message = format!("Failed to stage part: {}", err);
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            Error::TransientUpload { part, message }
        }
        _ => Error::FatalUpload {
            part,
            attempts: 1,
            message,
        },
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn create_multipart(&self, location: &StorageLocation) -> Result<SessionId> {
        self.object_path(location)?;
        let session_id = Uuid::new_v4().to_string();
        let staging = self.staging_dir(&session_id);

        fs::create_dir_all(&staging)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create staging directory {:?}: {}", staging, e),
            })?;

        self.sessions.insert(
            session_id.clone(),
            LocalSession {
                location: location.clone(),
                parts: BTreeMap::new(),
            },
        );

        debug!(?staging, %session_id, "Opened multipart session");
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        location: &StorageLocation,
        session_id: &str,
        part_index: usize,
        data: Bytes,
    ) -> Result<PartToken> {
        self.check_open(session_id, location)?;

        let path = self.part_path(session_id, part_index);
        Self::write_atomic(&path, &data)
            .await
            .map_err(|e| part_write_error(part_index, e))?;

        let token = format!("{}-{}", part_index, Uuid::new_v4().simple());
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;
        session.parts.insert(part_index, token.clone());
        Ok(token)
    }

    #[instrument(skip(self, parts), fields(backend = "local", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        location: &StorageLocation,
        session_id: &str,
        parts: &[PartResult],
    ) -> Result<()> {
        self.check_open(session_id, location)?;
        let target = self.object_path(location)?;

        {
            let session = self
                .sessions
                .get(session_id)
                .ok_or_else(|| Self::unknown_session(session_id))?;
            for (expected, part) in parts.iter().enumerate() {
                let recorded = session.parts.get(&part.chunk_index);
                if part.chunk_index != expected || recorded != Some(&part.part_token) {
                    return Err(Error::Internal {
                        message: format!(
                            "invalid part list at position {} (part {})",
                            expected, part.chunk_index
                        ),
                    });
                }
            }
        }

        let size = self.assemble(session_id, parts, &target).await?;
        self.sessions.remove(session_id);

        if let Err(e) = fs::remove_dir_all(self.staging_dir(session_id)).await {
            debug!(%session_id, error = %e, "Failed to clean staging directory");
        }

        debug!(?target, size, "Committed multipart object");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn abort_multipart(&self, _location: &StorageLocation, session_id: &str) -> Result<()> {
        // Unknown ids were already committed or aborted; their staging is gone.
        if self.sessions.remove(session_id).is_none() {
            return Ok(());
        }

        match fs::remove_dir_all(self.staging_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to remove staged parts for {}: {}", session_id, e),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn get_object(&self, location: &StorageLocation) -> Result<Bytes> {
        let full_path = self.object_path(location)?;
        debug!(?full_path, "Reading file");

        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound {
                location: location.to_string(),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to read {}: {}", location, e),
            }),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn put_object(&self, location: &StorageLocation, data: Bytes) -> Result<u64> {
        let full_path = self.object_path(location)?;
        let size = data.len() as u64;

        debug!(?full_path, size, "Writing file atomically");
        Self::write_atomic(&full_path, &data)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to write {}: {}", location, e),
            })?;

        debug!(?full_path, size, "File written successfully");
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete_object(&self, location: &StorageLocation) -> Result<()> {
        let full_path = self.object_path(location)?;
        debug!(?full_path, "Deleting file");

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound {
                location: location.to_string(),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to delete {}: {}", location, e),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, location: &StorageLocation) -> Result<bool> {
        let full_path = self.object_path(location)?;
        Ok(fs::metadata(&full_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_root = self.root.join(bucket);
        let mut results = Vec::new();

        // Recursively walk the bucket directory
        let mut stack = vec![bucket_root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let entry_path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                if metadata.is_dir() {
                    stack.push(entry_path);
                } else if metadata.is_file() {
                    let is_temp = entry.file_name().to_string_lossy().ends_with(".tmp");
                    if let Ok(relative) = entry_path.strip_prefix(&bucket_root) {
                        let key = relative.to_string_lossy().replace('\\', "/");
                        if !is_temp && key.starts_with(prefix) {
                            results.push(key);
                        }
                    }
                }
            }
        }

        results.sort();
        debug!(count = results.len(), "Found objects");
        Ok(results)
    }
}
