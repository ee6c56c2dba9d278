//! Per-source run locks.
//!
//! A lock is a file in the lock directory created with exclusive-create semantics, so
//! only one process at a time can hold a given source. Locks for different sources
//! never contend. Files left behind by crashed processes are removed by
//! `cleanup_stale_locks`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::utils::file_safe_name;

const LOCK_EXTENSION: &str = "lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("an ingestion run for source '{source_name}' is already active ({holder}); retry later once it finishes")]
    AlreadyRunning { source_name: String, holder: String },
    #[error("lock file error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub type LockResult<T> = Result<T, LockError>;

/// Diagnostic content of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub source: String,
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
    /// Distinguishes this holder from a later one that reused the file name.
    #[serde(default)]
    pub token: String,
}

impl LockInfo {
    fn describe(&self) -> String {
        format!(
            "held by pid {} on {} since {}",
            self.pid,
            self.host,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// A lock file currently present in the lock directory.
#[derive(Debug, Clone)]
pub struct LockStatus {
    pub path: PathBuf,
    pub info: Option<LockInfo>,
    pub age: Duration,
}

impl LockStatus {
    /// Source named in the file, or the file stem for unreadable locks.
    pub fn source(&self) -> String {
        match self.info {
            Some(ref info) => info.source.clone(),
            None => self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LockError + '_ {
    move |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(&LockConfig {
            dir: dir.into(),
            ..Default::default()
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_safe_name(source), LOCK_EXTENSION))
    }

    /// Try once to take the lock for `source`.
    pub fn try_acquire(&self, source: &str) -> LockResult<Option<SourceLock>> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let path = self.lock_path(source);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };

        let info = LockInfo {
            source: source.to_string(),
            pid: std::process::id(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
            token: uuid::Uuid::new_v4().to_string(),
        };
        let body = serde_json::to_vec(&info).unwrap_or_default();
        let written = file.write_all(&body).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(io_error(&path)(e));
        }

        debug!("Acquired lock for source '{}' at {}", source, path.display());
        Ok(Some(SourceLock {
            source: source.to_string(),
            path,
            token: info.token,
            released: false,
        }))
    }

    /// Take the lock for `source`, polling until `timeout` elapses.
    pub async fn acquire_lock(&self, source: &str, timeout: Duration) -> LockResult<SourceLock> {
        let started = Instant::now();
        loop {
            if let Some(lock) = self.try_acquire(source)? {
                return Ok(lock);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                let holder = self
                    .lock_info(source)
                    .map(|info| info.describe())
                    .unwrap_or_else(|| "holder unknown".to_string());
                info!(
                    "Source '{}' is locked by another run ({}); giving up after {:?}",
                    source, holder, timeout
                );
                return Err(LockError::AlreadyRunning {
                    source_name: source.to_string(),
                    holder,
                });
            }

            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Remove the lock file for `source` regardless of who holds it.
    pub fn release_lock(&self, source: &str) -> LockResult<bool> {
        let path = self.lock_path(source);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Released lock for source '{}'", source);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    pub fn is_locked(&self, source: &str) -> bool {
        self.lock_path(source).exists()
    }

    pub fn lock_info(&self, source: &str) -> Option<LockInfo> {
        read_info(&self.lock_path(source))
    }

    /// Every lock file in the directory with its age.
    pub fn list_locks(&self) -> LockResult<Vec<LockStatus>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };

        let now = SystemTime::now();
        let mut locks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&self.dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
                continue;
            }
            // The file may vanish between listing and stat.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            locks.push(LockStatus {
                info: read_info(&path),
                path,
                age,
            });
        }
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(locks)
    }

    /// Remove lock files older than `max_age_hours`. Returns the sources freed.
    pub fn cleanup_stale_locks(&self, max_age_hours: u64) -> LockResult<Vec<String>> {
        let max_age = Duration::from_secs(max_age_hours.saturating_mul(3600));
        let mut freed = Vec::new();

        for lock in self.list_locks()? {
            if lock.age < max_age {
                continue;
            }
            match fs::remove_file(&lock.path) {
                Ok(()) => {
                    let source = lock.source();
                    warn!(
                        "Removed stale lock for source '{}' ({}h old)",
                        source,
                        lock.age.as_secs() / 3600
                    );
                    freed.push(source);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&lock.path)(e)),
            }
        }
        Ok(freed)
    }
}

/// Guard for a held source lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct SourceLock {
    source: String,
    path: PathBuf,
    token: String,
    released: bool,
}

impl SourceLock {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, reporting I/O errors instead of swallowing them.
    pub fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.remove_if_ours()
    }

    fn remove_if_ours(&self) -> LockResult<()> {
        // A stale-lock cleanup may have handed the file to another run, which may not
        // have written its diagnostics yet. Only a file carrying our token is removed.
        match read_info(&self.path) {
            Some(info) if info.token == self.token => {}
            Some(_) => {
                warn!(
                    "Lock for source '{}' now belongs to another run; leaving it in place",
                    self.source
                );
                return Ok(());
            }
            None if !self.path.exists() => return Ok(()),
            None => {
                warn!(
                    "Lock for source '{}' at {} is unreadable; leaving it for stale cleanup",
                    self.source,
                    self.path.display()
                );
                return Ok(());
            }
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Released lock for source '{}'", self.source);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path)(e)),
        }
    }
}

impl Drop for SourceLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove_if_ours() {
            warn!("Failed to release lock for '{}': {}", self.source, e);
        }
    }
}
