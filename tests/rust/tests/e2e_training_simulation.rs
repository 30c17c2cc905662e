//! End-to-end training simulation test
//!
//! This test simulates a training job that checkpoints to object storage:
//! - Periodic background saves while the loop keeps mutating its state
//! - Retention of the most recent checkpoints
//! - A crash followed by resumption from the latest checkpoint
//! - A synchronous training loop driven through the blocking facade


use std::sync::Arc;

use anyhow::Result;
use checkpoint::{
    AsyncCheckpointIo, BincodeCodec, BlockingCheckpointIo, CheckpointIo, ObjectStoreCheckpointIo,
    RuntimeOptions,
};
use checkpoint_core::{CheckpointConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use storage::{LocalObjectStore, ObjectStore};
use tempfile::TempDir;

const BUCKET: &str = "experiments";
const KEEP_LAST: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TrainingState {
    step: u64,
    epoch: u32,
    weights: Vec<f32>,
    loss_history: Vec<f32>,
}

impl TrainingState {
    fn new(params: usize) -> Self {
        Self {
            step: 0,
            epoch: 0,
            weights: vec![0.0; params],
            loss_history: Vec::new(),
        }
    }

    /// One fake optimizer step
    fn train_step(&mut self) {
        self.step += 1;
        for (i, w) in self.weights.iter_mut().enumerate() {
            *w += ((i as u64 + self.step) % 7) as f32 * 0.01;
        }
        self.loss_history.push(1.0 / self.step as f32);
        if self.step % 10 == 0 {
            self.epoch += 1;
        }
    }
}

fn checkpoint_path(step: u64) -> String {
    format!("s3://{}/run-1/step-{:06}.ckpt", BUCKET, step)
}

fn config(root: &TempDir) -> CheckpointConfig {
    CheckpointConfig {
        chunk_size: 1024,
        min_multipart_size: 2048,
        max_parallelism: 4,
        retry: common::fast_retry(3),
        store: StoreConfig::Local {
            root: root.path().to_path_buf(),
        },
        ..Default::default()
    }
}

async fn prune(
    store: &Arc<dyn ObjectStore>,
    io: &AsyncCheckpointIo<BincodeCodec<TrainingState>>,
) -> Result<()> {
    io.wait_for_pending().await?;
    let keys = store.list(BUCKET, "run-1/").await?;
    if keys.len() > KEEP_LAST {
        for key in &keys[..keys.len() - KEEP_LAST] {
            io.remove_checkpoint(&format!("s3://{}/{}", BUCKET, key)).await?;
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_training_loop_with_async_checkpoints() -> Result<()> {
    common::init_tracing();
    let root = TempDir::new()?;
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(root.path()));

    let io = AsyncCheckpointIo::new(ObjectStoreCheckpointIo::with_store(
        config(&root),
        BincodeCodec::<TrainingState>::new(),
        store.clone(),
    )?);

    // 1. Train, checkpointing every 10 steps
    let mut state = TrainingState::new(4096);
    let mut saved = Vec::new();
    for _ in 0..50 {
        state.train_step();
        if state.step % 10 == 0 {
            io.save_checkpoint(&state, &checkpoint_path(state.step)).await?;
            saved.push(state.clone());
            prune(&store, &io).await?;
        }
    }
    io.teardown().await?;

    // 2. Only the newest checkpoints are retained
    let keys = store.list(BUCKET, "run-1/").await?;
    assert_eq!(
        keys,
        vec!["run-1/step-000040.ckpt".to_string(), "run-1/step-000050.ckpt".to_string()]
    );

    // 3. "Crash" and resume from the latest checkpoint with a fresh adapter
    let resumed_io = ObjectStoreCheckpointIo::new(config(&root), BincodeCodec::<TrainingState>::new())
        .await?;
    let latest = keys.last().map(|k| format!("s3://{}/{}", BUCKET, k));
    let latest = latest.ok_or_else(|| anyhow::anyhow!("no checkpoint to resume from"))?;
    let mut resumed = resumed_io.load_checkpoint(&latest).await?;

    assert_eq!(&resumed, saved.last().unwrap());
    assert_eq!(resumed.step, 50);
    assert_eq!(resumed.epoch, 5);

    // 4. Resumed training is identical to uninterrupted training
    resumed.train_step();
    state.train_step();
    assert_eq!(resumed, state);

    resumed_io.teardown().await?;
    Ok(())
}

#[test]
fn test_blocking_training_loop() -> Result<()> {
    let root = TempDir::new()?;
    let io = BlockingCheckpointIo::new(
        config(&root),
        BincodeCodec::<TrainingState>::new(),
        RuntimeOptions::default(),
    )?;

    let mut state = TrainingState::new(1024);
    for _ in 0..30 {
        state.train_step();
        if state.step % 15 == 0 {
            io.save_checkpoint(&state, &checkpoint_path(state.step))?;
        }
    }
    io.wait_for_pending()?;

    let restored = io.load_checkpoint(&checkpoint_path(30))?;
    assert_eq!(restored, state);

    let earlier = io.load_checkpoint(&checkpoint_path(15))?;
    assert_eq!(earlier.step, 15);

    io.remove_checkpoint(&checkpoint_path(15))?;
    assert!(io.load_checkpoint(&checkpoint_path(15)).unwrap_err().is_not_found());

    io.teardown()?;
    Ok(())
}
