//! Checkpoint adapters against memory, local and fault-injecting stores


use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use checkpoint::{AsyncCheckpointIo, CheckpointIo, ObjectStoreCheckpointIo, RawBytesCodec};
use checkpoint_core::{CheckpointConfig, Error, SessionState, StorageLocation};
use common::{fast_retry, payload, FaultyStore};
use storage::{LocalObjectStore, MemoryObjectStore, ObjectStore};
use tempfile::TempDir;

fn config() -> CheckpointConfig {
    CheckpointConfig {
        chunk_size: 16,
        min_multipart_size: 64,
        max_parallelism: 4,
        retry: fast_retry(3),
        ..Default::default()
    }
}

fn adapter(store: Arc<dyn ObjectStore>) -> Result<ObjectStoreCheckpointIo<RawBytesCodec>> {
    Ok(ObjectStoreCheckpointIo::with_store(config(), RawBytesCodec, store)?)
}

async fn assert_round_trips(io: &ObjectStoreCheckpointIo<RawBytesCodec>) -> Result<()> {
    // Zero bytes, single put, exactly one chunk below the threshold, multipart
    for (i, len) in [0usize, 10, 63, 64, 1000].into_iter().enumerate() {
        let path = format!("gs://bucket/ckpt/{i}.ckpt");
        let data = payload(len);
        io.save_checkpoint(&data, &path).await?;
        assert_eq!(io.load_checkpoint(&path).await?, data, "length {len}");
    }
    Ok(())
}

#[tokio::test]
async fn test_round_trip_memory() -> Result<()> {
    common::init_tracing();
    let io = adapter(Arc::new(MemoryObjectStore::new()))?;
    assert_round_trips(&io).await
}

#[tokio::test]
async fn test_round_trip_local() -> Result<()> {
    let dir = TempDir::new()?;
    let io = adapter(Arc::new(LocalObjectStore::new(dir.path())))?;
    assert_round_trips(&io).await?;

    // Nothing left staged after the multipart saves.
    let staging = dir.path().join(".multipart");
    let leftovers = std::fs::read_dir(&staging).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    Ok(())
}

#[tokio::test]
async fn test_zero_byte_multipart_round_trip() -> Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let io = ObjectStoreCheckpointIo::with_store(
        CheckpointConfig {
            min_multipart_size: 0,
            ..config()
        },
        RawBytesCodec,
        store.clone(),
    )?;

    io.save_checkpoint(&Bytes::new(), "s3://bucket/empty").await?;
    assert!(io.load_checkpoint("s3://bucket/empty").await?.is_empty());

    let sessions = store.sessions_for(&StorageLocation::new("bucket", "empty")?);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].1, SessionState::Committed);
    Ok(())
}

#[tokio::test]
async fn test_double_remove_is_not_found() -> Result<()> {
    let dir = TempDir::new()?;
    let stores: Vec<Arc<dyn ObjectStore>> = vec![
        Arc::new(MemoryObjectStore::new()),
        Arc::new(LocalObjectStore::new(dir.path())),
    ];

    for store in stores {
        let io = adapter(store)?;
        io.save_checkpoint(&payload(200), "s3://bucket/old.ckpt").await?;
        io.remove_checkpoint("s3://bucket/old.ckpt").await?;

        let err = io.remove_checkpoint("s3://bucket/old.ckpt").await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }
    Ok(())
}

#[tokio::test]
async fn test_uncommitted_session_is_not_found() -> Result<()> {
    let dir = TempDir::new()?;
    let stores: Vec<Arc<dyn ObjectStore>> = vec![
        Arc::new(MemoryObjectStore::new()),
        Arc::new(LocalObjectStore::new(dir.path())),
    ];
    let location = StorageLocation::parse("s3://bucket/partial.ckpt")?;

    for store in stores {
        let session = store.create_multipart(&location).await?;
        store.upload_part(&location, &session, 0, payload(16)).await?;

        let io = adapter(store.clone())?;
        let err = io.load_checkpoint("s3://bucket/partial.ckpt").await.unwrap_err();
        assert!(err.is_not_found(), "{}: {err}", store.name());
    }
    Ok(())
}

#[tokio::test]
async fn test_failed_save_leaves_previous_checkpoint_untouched() -> Result<()> {
    let store = Arc::new(FaultyStore::new().with_fault(|part, _| {
        // Only the second save reaches part 5.
        (part == 5).then(|| Error::FatalUpload {
            part,
            attempts: 1,
            message: "403 Forbidden".to_string(),
        })
    }));
    let io = adapter(store.clone())?;

    let first = payload(80);
    io.save_checkpoint(&first, "s3://bucket/latest").await?;

    let err = io
        .save_checkpoint(&payload(200), "s3://bucket/latest")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UploadAborted { .. }));
    assert_eq!(io.load_checkpoint("s3://bucket/latest").await?, first);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quick_async_saves_last_one_wins() -> Result<()> {
    let store = Arc::new(FaultyStore::new().with_delay(|_| Duration::from_millis(5)));
    let io = AsyncCheckpointIo::new(adapter(store.clone())?);

    let first = Bytes::from(vec![1u8; 300]);
    let second = Bytes::from(vec![2u8; 300]);
    io.save_checkpoint(&first, "s3://bucket/ckpt").await?;
    io.save_checkpoint(&second, "s3://bucket/ckpt").await?;
    io.wait_for_pending().await?;

    assert_eq!(io.load_checkpoint("s3://bucket/ckpt").await?, second);

    // Both saves committed; the second never raced the first.
    let sessions = store.inner.sessions_for(&StorageLocation::new("bucket", "ckpt")?);
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|(_, state)| *state == SessionState::Committed));
    assert!(store.peak_in_flight() <= 4);
    Ok(())
}

#[tokio::test]
async fn test_async_save_error_surfaces_on_next_call() -> Result<()> {
    let store = Arc::new(FaultyStore::new().with_fault(|part, _| {
        Some(Error::FatalUpload {
            part,
            attempts: 1,
            message: "403 Forbidden".to_string(),
        })
    }));
    let io = AsyncCheckpointIo::new(adapter(store.clone())?);

    io.save_checkpoint(&payload(100), "s3://bucket/doomed").await?;
    let err = io.load_checkpoint("s3://bucket/doomed").await.unwrap_err();
    assert!(matches!(err, Error::UploadAborted { .. }));

    // The failure is consumed; the object never appeared.
    let err = io.load_checkpoint("s3://bucket/doomed").await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_async_teardown_is_idempotent_and_drains() -> Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let io = AsyncCheckpointIo::new(adapter(store.clone())?);

    let data = payload(500);
    io.save_checkpoint(&data, "s3://bucket/final").await?;
    io.teardown().await?;
    io.teardown().await?;

    assert_eq!(
        store.get_object(&StorageLocation::new("bucket", "final")?).await?,
        data
    );
    let err = io.save_checkpoint(&data, "s3://bucket/late").await.unwrap_err();
    assert!(matches!(err, Error::TornDown));
    io.wait_for_pending().await?;
    assert!(!store.exists(&StorageLocation::new("bucket", "late")?).await?);
    Ok(())
}

fn slow_store() -> Arc<FaultyStore> {
    // 8 parts at parallelism 4 take two 50 ms rounds.
    Arc::new(FaultyStore::new().with_delay(|_| Duration::from_millis(50)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_wait_keeps_one_save_in_flight() -> Result<()> {
    let store = slow_store();
    let io = AsyncCheckpointIo::new(adapter(store.clone())?);

    io.save_checkpoint(&payload(128), "s3://bucket/first").await?;
    let waited = tokio::time::timeout(Duration::from_millis(10), io.wait_for_pending()).await;
    assert!(waited.is_err());

    // The next save still waits for the first one.
    io.save_checkpoint(&payload(128), "s3://bucket/second").await?;
    io.wait_for_pending().await?;

    assert!(store.peak_in_flight() <= 4, "peak {}", store.peak_in_flight());
    assert!(store.inner.exists(&StorageLocation::new("bucket", "first")?).await?);
    assert!(store.inner.exists(&StorageLocation::new("bucket", "second")?).await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_teardown_drains_save_after_cancelled_load() -> Result<()> {
    let store = slow_store();
    let io = AsyncCheckpointIo::new(adapter(store.clone())?);

    let data = payload(128);
    io.save_checkpoint(&data, "s3://bucket/final").await?;
    let loaded = tokio::time::timeout(
        Duration::from_millis(10),
        io.load_checkpoint("s3://bucket/final"),
    )
    .await;
    assert!(loaded.is_err());

    io.teardown().await?;
    assert_eq!(
        store.inner.get_object(&StorageLocation::new("bucket", "final")?).await?,
        data
    );
    Ok(())
}

#[tokio::test]
async fn test_adapter_from_json_config() -> Result<()> {
    let dir = TempDir::new()?;
    let json = format!(
        r#"{{
            "chunk_size": 32,
            "max_parallelism": 2,
            "min_multipart_size": 64,
            "retry": {{ "max_attempts": 2, "initial_delay": 1, "max_delay": 2 }},
            "store": {{ "backend": "local", "root": {:?} }}
        }}"#,
        dir.path()
    );
    let config = CheckpointConfig::from_json_str(&json)?;
    assert_eq!(config.retry.initial_delay, Duration::from_millis(1));

    let io = ObjectStoreCheckpointIo::new(config, RawBytesCodec).await?;
    io.save_checkpoint(&payload(256), "file://runs/a.ckpt").await?;
    assert!(dir.path().join("runs/a.ckpt").is_file());
    Ok(())
}
