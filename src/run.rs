//! One ingestion run for one source: lock held, checkpoint tracked.
//!
//! ```ignore
//! let mut run = IngestRun::start(&locks, &settings.checkpoint, "bbc", timeout).await?;
//! for (index, record) in records.enumerate() {
//!     if run.should_skip(index as u64) {
//!         continue;
//!     }
//!     // discover, fetch, dedup, mark...
//!     run.record(index as u64)?;
//! }
//! run.finish(Some(&engine))?;
//! ```

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::config::CheckpointConfig;
use crate::dedup::{DedupEngine, DedupError};
use crate::lock::{LockError, LockManager, SourceLock};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Dedup(#[from] DedupError),
}

/// An active run. Dropping it without `finish` releases the lock but keeps the
/// checkpoint, so the next run resumes where this one stopped.
#[derive(Debug)]
pub struct IngestRun {
    source: String,
    lock: Option<SourceLock>,
    checkpoint: CheckpointManager,
    start_index: u64,
    next_index: u64,
}

impl IngestRun {
    /// Take the source lock, then read the checkpoint.
    pub async fn start(
        locks: &LockManager,
        config: &CheckpointConfig,
        source: &str,
        timeout: Duration,
    ) -> Result<Self, RunError> {
        let lock = locks.acquire_lock(source, timeout).await?;
        let mut checkpoint = CheckpointManager::new(config, source);
        let start_index = checkpoint.resume_index();
        info!(
            "Starting run {} for '{}' at record {}",
            checkpoint.run_id(),
            source,
            start_index
        );

        Ok(Self {
            source: source.to_string(),
            lock: Some(lock),
            checkpoint,
            start_index,
            next_index: start_index,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn run_id(&self) -> &str {
        self.checkpoint.run_id()
    }

    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Index of the first record not yet recorded.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Whether the record was handled by an earlier run.
    pub fn should_skip(&self, index: u64) -> bool {
        index < self.start_index
    }

    /// Mark record `index` as handled. Returns true when a checkpoint was written.
    pub fn record(&mut self, index: u64) -> Result<bool, RunError> {
        self.next_index = self.next_index.max(index.saturating_add(1));
        Ok(self.checkpoint.record_progress(self.next_index)?)
    }

    pub fn checkpoint_now(&mut self) -> Result<(), RunError> {
        Ok(self.checkpoint.save(self.next_index)?)
    }

    /// Persist the near-duplicate index, drop the checkpoint and release the lock.
    ///
    /// If saving the index fails the checkpoint is kept, so the records are replayed
    /// (and re-indexed) by the next run.
    pub fn finish(mut self, dedup: Option<&DedupEngine>) -> Result<(), RunError> {
        if let Some(engine) = dedup {
            if let Err(e) = engine.save_index() {
                self.checkpoint.save(self.next_index)?;
                return Err(e.into());
            }
        }
        self.checkpoint.complete()?;
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        info!(
            "Finished run for '{}' after {} records",
            self.source,
            self.next_index.saturating_sub(self.start_index)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_checkpoint;

    fn setup(dir: &std::path::Path) -> (LockManager, CheckpointConfig) {
        let locks = LockManager::with_dir(dir.join("locks"))
            .with_poll_interval(Duration::from_millis(10));
        let config = CheckpointConfig {
            dir: dir.join("checkpoints"),
            interval: 2,
        };
        (locks, config)
    }

    #[tokio::test]
    async fn test_interrupted_run_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let (locks, config) = setup(dir.path());

        {
            let mut run = IngestRun::start(&locks, &config, "bbc", Duration::ZERO)
                .await
                .unwrap();
            for index in 0..5 {
                run.record(index).unwrap();
            }
        }
        assert!(!locks.is_locked("bbc"));

        let run = IngestRun::start(&locks, &config, "bbc", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(run.start_index(), 4);
        assert!(run.should_skip(3));
        assert!(!run.should_skip(4));
    }

    #[tokio::test]
    async fn test_finish_clears_checkpoint_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (locks, config) = setup(dir.path());

        let mut run = IngestRun::start(&locks, &config, "bbc", Duration::ZERO)
            .await
            .unwrap();
        run.record(0).unwrap();
        run.checkpoint_now().unwrap();
        let path = CheckpointManager::new(&config, "bbc").path().to_path_buf();
        assert_eq!(load_checkpoint(&path), 1);

        assert!(matches!(
            IngestRun::start(&locks, &config, "bbc", Duration::from_millis(20)).await,
            Err(RunError::Lock(LockError::AlreadyRunning { .. }))
        ));

        run.finish(None).unwrap();
        assert!(!path.exists());
        assert!(!locks.is_locked("bbc"));
    }
}
