//! In-memory object store
//!
//! Keeps objects and multipart sessions in process memory. Multipart
//! objects only become visible on completion, and every session keeps its
//! final state so callers can inspect how an upload ended.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use checkpoint_core::{
    Error, PartResult, PartToken, Result, SessionId, SessionState, StorageLocation,
};
use dashmap::DashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::ObjectStore;

#[derive(Debug)]
struct MemorySession {
    location: StorageLocation,
    state: SessionState,
    parts: BTreeMap<usize, (PartToken, Bytes)>,
}

/// Process-local object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<StorageLocation, Bytes>,
    sessions: DashMap<SessionId, MemorySession>,
    max_part_count: Option<usize>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that rejects uploads above `max_parts` parts
    pub fn with_max_part_count(max_parts: usize) -> Self {
        Self {
            max_part_count: Some(max_parts),
            ..Self::default()
        }
    }

    /// State of a session, if it was ever opened
    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.state)
    }

    /// Every session opened against `location`, with its state
    pub fn sessions_for(&self, location: &StorageLocation) -> Vec<(SessionId, SessionState)> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| &entry.location == location)
            .map(|entry| (entry.key().clone(), entry.state))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    fn not_found(location: &StorageLocation) -> Error {
        Error::NotFound {
            location: location.to_string(),
        }
    }

    fn unknown_session(session_id: &str) -> Error {
        Error::Storage {
            message: format!("no such upload session: {}", session_id),
        }
    }

    fn check_open(session_id: &str, session: &MemorySession, location: &StorageLocation) -> Result<()> {
        if &session.location != location {
            return Err(Error::Internal {
                message: format!(
                    "session {} targets {}, not {}",
                    session_id, session.location, location
                ),
            });
        }
        if session.state != SessionState::Open {
            return Err(Error::InvalidSessionTransition {
                session_id: session_id.to_string(),
                from: session.state.to_string(),
                to: SessionState::Open.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn max_part_count(&self) -> Option<usize> {
        self.max_part_count
    }

    async fn create_multipart(&self, location: &StorageLocation) -> Result<SessionId> {
        location.require_key()?;
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            MemorySession {
                location: location.clone(),
                state: SessionState::Open,
                parts: BTreeMap::new(),
            },
        );
        debug!(%location, %session_id, "Opened multipart session");
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        location: &StorageLocation,
        session_id: &str,
        part_index: usize,
        data: Bytes,
    ) -> Result<PartToken> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;
        Self::check_open(session_id, &session, location)?;

        let token = format!("\"{}\"", Uuid::new_v4().simple());
        session.parts.insert(part_index, (token.clone(), data));
        Ok(token)
    }

    async fn complete_multipart(
        &self,
        location: &StorageLocation,
        session_id: &str,
        parts: &[PartResult],
    ) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;
        Self::check_open(session_id, &session, location)?;

        let mut object = BytesMut::new();
        for (expected, part) in parts.iter().enumerate() {
            if part.chunk_index != expected {
                return Err(Error::Internal {
                    message: format!(
                        "part list out of order: position {} holds part {}",
                        expected, part.chunk_index
                    ),
                });
            }
            match session.parts.get(&part.chunk_index) {
                Some((token, data)) if *token == part.part_token => object.extend_from_slice(data),
                _ => {
                    return Err(Error::Internal {
                        message: format!("part {} was not uploaded with this token", part.chunk_index),
                    })
                }
            }
        }

        session.state = SessionState::Committed;
        session.parts.clear();
        drop(session);

        self.objects.insert(location.clone(), object.freeze());
        debug!(%location, %session_id, parts = parts.len(), "Committed multipart session");
        Ok(())
    }

    async fn abort_multipart(&self, location: &StorageLocation, session_id: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;

        let state = session.state;
        match state {
            SessionState::Aborted => Ok(()),
            SessionState::Committed | SessionState::Completing => {
                Err(Error::InvalidSessionTransition {
                    session_id: session_id.to_string(),
                    from: state.to_string(),
                    to: SessionState::Aborted.to_string(),
                })
            }
            SessionState::Open => {
                session.state = SessionState::Aborted;
                session.parts.clear();
                debug!(%location, %session_id, "Aborted multipart session");
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get_object(&self, location: &StorageLocation) -> Result<Bytes> {
        self.objects
            .get(location)
            .map(|data| data.value().clone())
            .ok_or_else(|| Self::not_found(location))
    }

    #[instrument(skip(self, data), fields(backend = "memory", size = data.len()))]
    async fn put_object(&self, location: &StorageLocation, data: Bytes) -> Result<u64> {
        location.require_key()?;
        let size = data.len() as u64;
        self.objects.insert(location.clone(), data);
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete_object(&self, location: &StorageLocation) -> Result<()> {
        self.objects
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(location))
    }

    async fn exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.objects.contains_key(location))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().bucket == bucket && entry.key().key.starts_with(prefix))
            .map(|entry| entry.key().key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
