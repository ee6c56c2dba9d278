//! Crash-safe progress checkpoints.
//!
//! A checkpoint records how far a run got through its input so a restarted run can
//! skip what was already handled. Writes are atomic: a reader sees either the previous
//! checkpoint or the new one, never a torn file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::utils::{file_safe_name, write_atomic};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode checkpoint: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    /// Index of the first record not yet handled.
    pub last_index: u64,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>, last_index: u64) -> Self {
        Self {
            run_id: run_id.into(),
            last_index,
            timestamp: Utc::now(),
        }
    }
}

/// Atomically replace the checkpoint at `path`.
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> CheckpointResult<()> {
    let body = serde_json::to_vec_pretty(checkpoint)?;
    write_atomic(path, &body).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a checkpoint. Missing and unreadable files both yield None.
pub fn read_checkpoint(path: &Path) -> Option<Checkpoint> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read checkpoint {}: {}; starting from 0", path.display(), e);
            return None;
        }
    };
    match serde_json::from_slice(&data) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            warn!("Corrupt checkpoint {}: {}; starting from 0", path.display(), e);
            None
        }
    }
}

/// Index to resume from; 0 when there is no usable checkpoint.
pub fn load_checkpoint(path: &Path) -> u64 {
    read_checkpoint(path).map_or(0, |c| c.last_index)
}

/// Delete the checkpoint. False if there was none.
pub fn remove_checkpoint(path: &Path) -> CheckpointResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Checkpointing for one run key, saving every `interval` records.
#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    run_id: String,
    interval: u64,
    last_saved: u64,
}

impl CheckpointManager {
    pub fn new(config: &CheckpointConfig, run_key: &str) -> Self {
        let path = config
            .dir
            .join(format!(".checkpoint-{}.json", file_safe_name(run_key)));
        Self::at_path(path, config.interval)
    }

    pub fn at_path(path: impl Into<PathBuf>, interval: u64) -> Self {
        Self {
            path: path.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
            interval: interval.max(1),
            last_saved: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Index to start from. A checkpoint left by an earlier run is honored.
    pub fn resume_index(&mut self) -> u64 {
        let Some(checkpoint) = read_checkpoint(&self.path) else {
            return 0;
        };
        if checkpoint.run_id != self.run_id {
            info!(
                "Resuming at record {} from checkpoint of run {} ({})",
                checkpoint.last_index,
                checkpoint.run_id,
                checkpoint.timestamp.to_rfc3339()
            );
        }
        self.last_saved = checkpoint.last_index;
        checkpoint.last_index
    }

    /// Note that records before `next_index` are done. Saves when an interval has passed.
    pub fn record_progress(&mut self, next_index: u64) -> CheckpointResult<bool> {
        if next_index < self.last_saved.saturating_add(self.interval) {
            return Ok(false);
        }
        self.save(next_index)?;
        Ok(true)
    }

    /// Save unconditionally.
    pub fn save(&mut self, next_index: u64) -> CheckpointResult<()> {
        save_checkpoint(&self.path, &Checkpoint::new(self.run_id.clone(), next_index))?;
        self.last_saved = next_index;
        debug!("Checkpoint {} at record {}", self.path.display(), next_index);
        Ok(())
    }

    /// The run finished; the next run starts from the beginning.
    pub fn complete(&mut self) -> CheckpointResult<()> {
        if remove_checkpoint(&self.path)? {
            debug!("Removed checkpoint {}", self.path.display());
        }
        self.last_saved = 0;
        Ok(())
    }
}
