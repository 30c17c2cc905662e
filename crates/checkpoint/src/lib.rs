//! Checkpoint IO against object storage
//!
//! Provides checkpoint save/load/remove for training loops:
//! - [`ObjectStoreCheckpointIo`] picks a single put or a parallel multipart
//!   upload per payload size
//! - [`AsyncCheckpointIo`] moves uploads to a background task
//! - [`BlockingCheckpointIo`] drives both from synchronous code

pub mod adapter;
pub mod async_adapter;
pub mod blocking;
pub mod codec;
pub mod io;

pub use adapter::ObjectStoreCheckpointIo;
pub use async_adapter::AsyncCheckpointIo;
pub use blocking::{BlockingCheckpointIo, RuntimeOptions};
pub use codec::{BincodeCodec, CheckpointCodec, RawBytesCodec};
pub use io::CheckpointIo;
