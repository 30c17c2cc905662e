//! Object store checkpoint adapter
//!
//! Routes checkpoint save/load/remove to object-store keys parsed from a
//! `scheme://bucket/key` path. Payloads below the multipart threshold (or
//! all payloads, when multipart is disabled) are written with a single
//! atomic put; larger payloads go through the parallel multipart engine.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use checkpoint_core::{CheckpointConfig, Error, Result, StorageLocation};
use parking_lot::RwLock;
use storage::{build_store, MultipartUploadCoordinator, ObjectStore};
use tracing::{debug, info, instrument};

use crate::codec::CheckpointCodec;
use crate::io::CheckpointIo;

/// Store client plus the coordinator bound to it
#[derive(Clone)]
struct Client {
    store: Arc<dyn ObjectStore>,
    coordinator: MultipartUploadCoordinator,
}

/// Checkpoint IO backed by an object store
pub struct ObjectStoreCheckpointIo<C: CheckpointCodec> {
    config: CheckpointConfig,
    codec: C,
    /// `None` once torn down
    client: RwLock<Option<Client>>,
}

impl<C: CheckpointCodec> ObjectStoreCheckpointIo<C> {
    /// Create an adapter, building the store named by `config.store`
    pub async fn new(config: CheckpointConfig, codec: C) -> Result<Self> {
        Self::connect(config, codec, None).await
    }

    /// Create an adapter over an already constructed store
    pub fn with_store(
        config: CheckpointConfig,
        codec: C,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let coordinator = MultipartUploadCoordinator::from_config(store.clone(), &config)?;

        debug!(
            backend = store.name(),
            chunk_size = config.chunk_size,
            max_parallelism = config.max_parallelism,
            multipart_enabled = config.multipart_enabled,
            "Checkpoint IO ready"
        );

        Ok(Self {
            config,
            codec,
            client: RwLock::new(Some(Client { store, coordinator })),
        })
    }

    /// Create an adapter from an optional store, building one from
    /// configuration when none is given
    pub async fn connect(
        config: CheckpointConfig,
        codec: C,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let store = match store {
            Some(store) => store,
            None => build_store(&config.store).await?,
        };
        Self::with_store(config, codec, store)
    }

    /// Adapter configuration
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Codec used for checkpoint state
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Whether [`CheckpointIo::teardown`] has run
    pub fn is_torn_down(&self) -> bool {
        self.client.read().is_none()
    }

    fn client(&self) -> Result<Client> {
        self.client.read().clone().ok_or(Error::TornDown)
    }

    fn locate(path: &str) -> Result<StorageLocation> {
        let location = StorageLocation::parse(path)?;
        location.require_key()?;
        Ok(location)
    }

    /// Store an already encoded payload at `path`
    ///
    /// # Returns
    /// Number of bytes written
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub async fn save_payload(&self, payload: Bytes, path: &str) -> Result<u64> {
        let location = Self::locate(path)?;
        let client = self.client()?;
        let start = Instant::now();
        let size = payload.len() as u64;
        let multipart = self.config.use_multipart(size);

        let written = if multipart {
            client.coordinator.upload(&location, payload).await?
        } else {
            client.store.put_object(&location, payload).await?
        };

        let elapsed = start.elapsed();
        info!(
            %location,
            multipart,
            size_bytes = written,
            elapsed_ms = elapsed.as_millis() as u64,
            throughput_mbps = (written as f64 / 1024.0 / 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON),
            "Checkpoint saved"
        );

        Ok(written)
    }

    /// Read the raw payload stored at `path`
    #[instrument(skip(self))]
    pub async fn load_payload(&self, path: &str) -> Result<Bytes> {
        let location = Self::locate(path)?;
        let client = self.client()?;
        let payload = client.store.get_object(&location).await?;
        debug!(%location, size = payload.len(), "Checkpoint loaded");
        Ok(payload)
    }
}

#[async_trait]
impl<C: CheckpointCodec> CheckpointIo for ObjectStoreCheckpointIo<C> {
    type State = C::State;

    async fn save_checkpoint(&self, state: &C::State, path: &str) -> Result<()> {
        let payload = self.codec.encode(state)?;
        self.save_payload(payload, path).await.map(|_| ())
    }

    async fn load_checkpoint(&self, path: &str) -> Result<C::State> {
        let payload = self.load_payload(path).await?;
        self.codec.decode(payload)
    }

    #[instrument(skip(self))]
    async fn remove_checkpoint(&self, path: &str) -> Result<()> {
        let location = Self::locate(path)?;
        let client = self.client()?;
        client.store.delete_object(&location).await?;
        info!(%location, "Checkpoint removed");
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        if let Some(client) = self.client.write().take() {
            info!(backend = client.store.name(), "Checkpoint IO torn down");
        }
        Ok(())
    }
}
