//! Multipart upload engine behavior under injected faults


use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use checkpoint_core::{Error, SessionState, StorageLocation};
use common::{fast_retry, payload, FaultyStore};
use storage::{MultipartUploadCoordinator, ObjectStore};

fn target() -> StorageLocation {
    StorageLocation::new("training", "run-7/step-500.ckpt").unwrap()
}

fn coordinator(
    store: &Arc<FaultyStore>,
    chunk_size: u64,
    max_parallelism: usize,
) -> Result<MultipartUploadCoordinator> {
    Ok(MultipartUploadCoordinator::new(
        store.clone(),
        fast_retry(3),
        chunk_size,
        max_parallelism,
    )?)
}

#[tokio::test]
async fn test_fatal_failure_on_chunk_two_aborts_upload() -> Result<()> {
    common::init_tracing();
    let store = Arc::new(FaultyStore::new().with_fault(|part, _| {
        (part == 2).then(|| Error::FatalUpload {
            part,
            attempts: 1,
            message: "403 Forbidden".to_string(),
        })
    }));

    // 5 chunks of 10 bytes
    let err = coordinator(&store, 10, 2)?
        .upload(&target(), payload(50))
        .await
        .unwrap_err();

    match err {
        Error::UploadAborted {
            source,
            abort_error,
            ..
        } => {
            assert!(matches!(*source, Error::FatalUpload { part: 2, .. }));
            assert!(abort_error.is_none());
        }
        other => panic!("expected UploadAborted, got {other}"),
    }

    assert!(!store.exists(&target()).await?);
    let sessions = store.inner.sessions_for(&target());
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].1, SessionState::Aborted);
    // A fatal error is not retried.
    assert_eq!(store.attempts(2), 1);
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_is_retried() -> Result<()> {
    let store = Arc::new(FaultyStore::new().with_fault(|part, attempt| {
        (part == 1 && attempt < 3).then(|| Error::TransientUpload {
            part,
            message: "503 Slow Down".to_string(),
        })
    }));

    let data = payload(40);
    let written = coordinator(&store, 10, 4)?.upload(&target(), data.clone()).await?;

    assert_eq!(written, 40);
    assert_eq!(store.attempts(1), 3);
    assert_eq!(store.attempts(0), 1);
    assert_eq!(store.get_object(&target()).await?, data);
    Ok(())
}

#[tokio::test]
async fn test_retry_exhaustion_is_fatal() -> Result<()> {
    let store = Arc::new(FaultyStore::new().with_fault(|part, _| {
        (part == 2).then(|| Error::TransientUpload {
            part,
            message: "connection reset".to_string(),
        })
    }));

    let err = coordinator(&store, 10, 1)?
        .upload(&target(), payload(50))
        .await
        .unwrap_err();

    let Error::UploadAborted { source, .. } = err else {
        panic!("expected UploadAborted, got {err}");
    };
    assert!(matches!(
        *source,
        Error::FatalUpload {
            part: 2,
            attempts: 3,
            ..
        }
    ));
    assert_eq!(store.attempts(2), 3);
    // Sequential worker stops after the failure.
    assert_eq!(store.attempts(3), 0);
    assert!(!store.exists(&target()).await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_out_of_order_completion_commits_ordered_parts() -> Result<()> {
    // Later parts finish first.
    let store = Arc::new(
        FaultyStore::new().with_delay(|part| Duration::from_millis(10 + (4 - part as u64) * 25)),
    );
    let data = payload(50);

    coordinator(&store, 10, 5)?.upload(&target(), data.clone()).await?;

    let order = store.completion_order();
    assert_eq!(order.len(), 5);
    assert_ne!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(store.get_object(&target()).await?, data);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallelism_bound_is_respected() -> Result<()> {
    let store = Arc::new(FaultyStore::new().with_delay(|_| Duration::from_millis(15)));
    let data = payload(100);

    // 10 chunks, at most 2 in flight
    coordinator(&store, 10, 2)?.upload(&target(), data.clone()).await?;

    assert_eq!(store.peak_in_flight(), 2);
    assert_eq!(store.completion_order().len(), 10);
    assert_eq!(store.get_object(&target()).await?, data);
    Ok(())
}

#[tokio::test]
async fn test_completion_failure_aborts_session() -> Result<()> {
    let store = Arc::new(FaultyStore::new().fail_complete());

    let err = coordinator(&store, 10, 2)?
        .upload(&target(), payload(30))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UploadAborted { .. }));
    assert!(!store.exists(&target()).await?);
    assert_eq!(store.inner.sessions_for(&target())[0].1, SessionState::Aborted);
    Ok(())
}

#[tokio::test]
async fn test_abort_failure_is_attached() -> Result<()> {
    let store = Arc::new(
        FaultyStore::new()
            .fail_abort()
            .with_fault(|part, _| {
                (part == 0).then(|| Error::FatalUpload {
                    part,
                    attempts: 1,
                    message: "400 Bad Request".to_string(),
                })
            }),
    );

    let err = coordinator(&store, 10, 2)?
        .upload(&target(), payload(30))
        .await
        .unwrap_err();

    let Error::UploadAborted { abort_error, .. } = &err else {
        panic!("expected UploadAborted, got {err}");
    };
    assert!(abort_error.is_some());
    assert!(err.to_string().contains("abort also failed"));
    assert!(!store.exists(&target()).await?);
    Ok(())
}
