//! Configuration for the ledger, dedup engine, checkpoints and locks.
//!
//! Settings load from an optional TOML file, then environment variables override
//! individual fields. Each component takes its own section in its constructor.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dedup::HashField;
use crate::repository::util::is_postgres_url;

/// Default ledger database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "ledger.db";

/// Environment prefix for per-source daily quota limits, e.g. `QUOTA_BBC=350`.
pub const QUOTA_ENV_PREFIX: &str = "QUOTA_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Crawl ledger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// `embedded` (SQLite) or `client-server` (PostgreSQL).
    pub backend: String,
    /// Explicit database URL. Required for client-server.
    pub database_url: Option<String>,
    /// SQLite file used when no URL is set.
    pub database_path: PathBuf,
    pub max_connections: usize,
    pub min_connections: usize,
    pub acquire_timeout_secs: u64,
    pub statement_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    /// Disable TLS for PostgreSQL connections.
    pub no_tls: bool,
    /// Apply pending schema migrations when a backend opens.
    pub auto_migrate: bool,
    pub max_retries: u32,
    /// Daily ingest limit per source.
    pub quota_limits: BTreeMap<String, u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: "embedded".to_string(),
            database_url: None,
            database_path: PathBuf::from(DEFAULT_DATABASE_FILENAME),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            statement_timeout_ms: 30_000,
            busy_timeout_ms: 5_000,
            no_tls: false,
            auto_migrate: true,
            max_retries: 3,
            quota_limits: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    /// Embedded ledger stored at `path`.
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            ..Default::default()
        }
    }

    /// Client-server ledger at `database_url`.
    pub fn client_server(database_url: impl Into<String>) -> Self {
        Self {
            backend: "client-server".to_string(),
            database_url: Some(database_url.into()),
            ..Default::default()
        }
    }

    pub fn with_quota(mut self, source: impl Into<String>, limit: u64) -> Self {
        self.quota_limits.insert(source.into(), limit);
        self
    }

    /// URL for the embedded store: the explicit URL if it is not PostgreSQL, else the path.
    pub fn sqlite_url(&self) -> String {
        match self.database_url {
            Some(ref url) if !is_postgres_url(url) => url.clone(),
            _ => self.database_path.display().to_string(),
        }
    }

    pub fn quota_limit(&self, source: &str) -> Option<u64> {
        self.quota_limits.get(source).copied()
    }
}

/// Deduplication engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Fields fed into the exact content hash.
    pub hash_fields: Vec<HashField>,
    pub enable_near_dup: bool,
    /// Minimum estimated Jaccard similarity for a near duplicate.
    pub similarity_threshold: f64,
    /// Capacity of the in-memory exact-hash cache.
    pub cache_size: usize,
    pub num_shards: usize,
    pub num_perm: usize,
    /// Words per shingle.
    pub shingle_size: usize,
    /// Where the near-duplicate index is persisted. None keeps it in memory only.
    pub index_path: Option<PathBuf>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            hash_fields: vec![HashField::Text, HashField::Url],
            enable_near_dup: true,
            similarity_threshold: 0.85,
            cache_size: 100_000,
            num_shards: 16,
            num_perm: 128,
            shingle_size: 3,
            index_path: None,
        }
    }
}

/// Checkpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    /// Records between checkpoint saves.
    pub interval: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
            interval: 1_000,
        }
    }
}

/// Source lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub dir: PathBuf,
    /// How long `acquire_lock` waits for a busy source.
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Age after which a lock file is considered abandoned.
    pub stale_after_hours: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("locks"),
            timeout_secs: 30,
            poll_interval_ms: 500,
            stale_after_hours: 24,
        }
    }
}

/// All settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base directory that relative paths resolve against.
    pub data_dir: PathBuf,
    pub ledger: LedgerConfig,
    pub dedup: DedupConfig,
    pub checkpoint: CheckpointConfig,
    pub locks: LockConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // Platform data dir -> home dir -> current dir
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("silverledger");

        Self {
            data_dir,
            ledger: LedgerConfig::default(),
            dedup: DedupConfig::default(),
            checkpoint: CheckpointConfig::default(),
            locks: LockConfig::default(),
        }
    }
}

impl Settings {
    /// Settings with every relative path rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
        .resolve_paths()
    }

    /// Load from an optional TOML file, apply environment overrides, resolve paths.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(settings.with_env_overrides().resolve_paths())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.with_overrides(&vars)
    }

    /// Apply overrides from a variable map (same names as the environment).
    pub fn with_overrides(mut self, vars: &HashMap<String, String>) -> Self {
        let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(dir) = get("SILVER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        // Ledger
        if let Some(url) = get("DATABASE_URL") {
            self.ledger.database_url = Some(url.to_string());
        }
        if let Some(backend) = get("LEDGER_BACKEND") {
            self.ledger.backend = backend.to_string();
        }
        if let Some(n) = get("LEDGER_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.ledger.max_connections = n;
        }
        if let Some(n) = get("LEDGER_MIN_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.ledger.min_connections = n;
        }
        if let Some(ms) = get("LEDGER_STATEMENT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.ledger.statement_timeout_ms = ms;
        }
        if let Some(n) = get("LEDGER_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.ledger.max_retries = n;
        }
        if let Some(flag) = get("SILVER_NO_TLS") {
            self.ledger.no_tls = parse_flag(flag);
        }
        for (name, value) in vars {
            let Some(source) = name.strip_prefix(QUOTA_ENV_PREFIX) else {
                continue;
            };
            if source.is_empty() {
                continue;
            }
            if let Ok(limit) = value.trim().parse::<u64>() {
                self.ledger
                    .quota_limits
                    .insert(source.to_ascii_lowercase(), limit);
            }
        }

        // Dedup
        if let Some(fields) = get("DEDUP_HASH_FIELDS") {
            let parsed: Vec<HashField> = fields
                .split(',')
                .filter_map(|f| HashField::from_str(f.trim()))
                .collect();
            if !parsed.is_empty() {
                self.dedup.hash_fields = parsed;
            }
        }
        if let Some(flag) = get("DEDUP_ENABLE_NEAR_DUP") {
            self.dedup.enable_near_dup = parse_flag(flag);
        }
        if let Some(t) = get("DEDUP_SIMILARITY_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.dedup.similarity_threshold = t;
        }
        // Negative sizes clamp to zero and are rejected by the engine.
        if let Some(size) = get("DEDUP_CACHE_SIZE").and_then(|v| v.parse::<i64>().ok()) {
            self.dedup.cache_size = usize::try_from(size.max(0)).unwrap_or(usize::MAX);
        }
        if let Some(n) = get("DEDUP_LSH_SHARDS").and_then(|v| v.parse().ok()) {
            self.dedup.num_shards = n;
        }
        if let Some(n) = get("DEDUP_NUM_PERM").and_then(|v| v.parse().ok()) {
            self.dedup.num_perm = n;
        }
        if let Some(n) = get("DEDUP_SHINGLE_SIZE").and_then(|v| v.parse().ok()) {
            self.dedup.shingle_size = n;
        }
        if let Some(path) = get("DEDUP_INDEX_PATH") {
            self.dedup.index_path = Some(PathBuf::from(path));
        }

        // Checkpoints and locks
        if let Some(dir) = get("CHECKPOINT_DIR") {
            self.checkpoint.dir = PathBuf::from(dir);
        }
        if let Some(n) = get("CHECKPOINT_INTERVAL").and_then(|v| v.parse().ok()) {
            self.checkpoint.interval = n;
        }
        if let Some(dir) = get("LOCK_DIR") {
            self.locks.dir = PathBuf::from(dir);
        }
        if let Some(secs) = get("LOCK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.locks.timeout_secs = secs;
        }

        self
    }

    /// Root relative paths at `data_dir`.
    pub fn resolve_paths(mut self) -> Self {
        let base = self.data_dir.clone();
        let resolve = |path: &Path| -> PathBuf {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        self.ledger.database_path = resolve(&self.ledger.database_path);
        self.checkpoint.dir = resolve(&self.checkpoint.dir);
        self.locks.dir = resolve(&self.locks.dir);
        self.dedup.index_path = self.dedup.index_path.as_deref().map(resolve);
        self
    }

    /// Create the data, checkpoint and lock directories.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.checkpoint.dir)?;
        std::fs::create_dir_all(&self.locks.dir)?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
