//! silverledger: durable ingestion state for a deduplicated text corpus.
//!
//! This crate provides the pieces that make repeated, possibly concurrent and possibly
//! interrupted ingestion runs safe:
//! - `ledger`: per-URL crawl state machine, daily quotas and feed throttling
//! - `dedup`: exact-hash LRU cache plus persisted MinHash/LSH near-duplicate index
//! - `checkpoint`: atomic progress snapshots for crash resumption
//! - `lock`: per-source cross-process mutual exclusion
//! - `run`: glue tying a lock, a checkpoint and a dedup engine to one driver run

pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod ledger;
pub mod lock;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod run;
pub mod schema;
pub mod utils;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointManager};
pub use config::{CheckpointConfig, DedupConfig, LedgerConfig, LockConfig, Settings};
pub use dedup::{DedupEngine, DedupError, DedupOutcome, DuplicateType};
pub use ledger::{CrawlLedger, LedgerBackend, LedgerError, LedgerResult};
pub use lock::{LockError, LockManager, SourceLock};
pub use models::{EntryState, FetchInfo, LedgerEntry, ProcessedInfo};
pub use run::{IngestRun, RunError};
