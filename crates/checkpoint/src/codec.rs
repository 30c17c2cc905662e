//! Checkpoint state encoding
//!
//! A codec turns training state into the opaque payload stored at a
//! checkpoint location and back. Encoded payloads carry a small header so
//! a load can reject objects that were not written by a checkpoint codec.

use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};
use checkpoint_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes for encoded checkpoints
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CKPT";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Magic (4) + version (4)
const HEADER_LEN: usize = 8;

/// Converts checkpoint state to and from payload bytes
pub trait CheckpointCodec: Send + Sync + 'static {
    /// In-memory checkpoint state
    type State: Send + Sync + 'static;

    /// Encode `state` into a self-contained payload
    fn encode(&self, state: &Self::State) -> Result<Bytes>;

    /// Decode a payload produced by [`CheckpointCodec::encode`]
    fn decode(&self, payload: Bytes) -> Result<Self::State>;
}

/// Bincode codec for any serde-serializable state
pub struct BincodeCodec<T> {
    _state: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _state: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BincodeCodec").finish()
    }
}

impl<T> CheckpointCodec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type State = T;

    fn encode(&self, state: &T) -> Result<Bytes> {
        let body = bincode::serialize(state).map_err(|e| Error::Serialization(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_slice(&CHECKPOINT_MAGIC);
        buf.put_u32_le(CHECKPOINT_VERSION);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    fn decode(&self, payload: Bytes) -> Result<T> {
        let body = strip_header(&payload)?;
        bincode::deserialize(body).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn strip_header(payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < HEADER_LEN || payload[..4] != CHECKPOINT_MAGIC {
        return Err(Error::Serialization(
            "Invalid checkpoint magic".to_string(),
        ));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&payload[4..HEADER_LEN]);
    let version = u32::from_le_bytes(version);
    if version != CHECKPOINT_VERSION {
        return Err(Error::Serialization(format!(
            "Unsupported checkpoint version: expected {}, got {}",
            CHECKPOINT_VERSION, version
        )));
    }

    Ok(&payload[HEADER_LEN..])
}

/// Pass-through codec for callers that serialize state themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytesCodec;

impl CheckpointCodec for RawBytesCodec {
    type State = Bytes;

    fn encode(&self, state: &Bytes) -> Result<Bytes> {
        Ok(state.clone())
    }

    fn decode(&self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}
