//! Run coordination: source locks, checkpoints and resuming after a crash.

use std::time::Duration;

use silverledger::checkpoint::{load_checkpoint, read_checkpoint, save_checkpoint};
use silverledger::models::ProcessedInfo;
use silverledger::{
    Checkpoint, CheckpointConfig, CrawlLedger, DedupConfig, DedupEngine, IngestRun, LedgerConfig,
    LockError, LockManager, RunError,
};

const RECORDS: [(&str, &str); 6] = [
    ("https://bbc.example/0", "first story about the harbour and the storm"),
    ("https://bbc.example/1", "second story about the council budget vote"),
    ("https://bbc.example/2", "first story about the harbour and the storm"),
    ("https://bbc.example/3", "third story about the railway timetable"),
    ("https://bbc.example/4", "fourth story about the school inspection"),
    ("https://bbc.example/5", "fifth story about the weekend football results"),
];

/// Feed records through the ledger and dedup engine, stopping after `stop_after`.
async fn ingest(
    run: &mut IngestRun,
    ledger: &CrawlLedger,
    dedup: &mut DedupEngine,
    stop_after: Option<u64>,
) -> u64 {
    let mut handled = 0;
    for (index, (url, text)) in RECORDS.iter().enumerate() {
        let index = index as u64;
        if run.should_skip(index) {
            continue;
        }
        if stop_after.is_some_and(|stop| index > stop) {
            break;
        }
        ledger.discover_url(url, run.source()).await.unwrap();
        if ledger.should_fetch_url(url, run.source(), false).await.unwrap() {
            let outcome = dedup.process_document(text, url);
            let original = ledger.is_duplicate(&outcome.text_hash).await.unwrap();
            match original.or(outcome.similar_url) {
                Some(original) => ledger
                    .mark_duplicate(url, &original, run.source(), &outcome.text_hash)
                    .await
                    .unwrap(),
                None => ledger
                    .mark_processed(url, run.source(), ProcessedInfo::new(outcome.text_hash))
                    .await
                    .unwrap(),
            }
            handled += 1;
        }
        run.record(index).unwrap();
    }
    handled
}

#[tokio::test]
async fn test_crashed_run_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = CrawlLedger::connect(&LedgerConfig::embedded(dir.path().join("ledger.db")))
        .await
        .unwrap();
    let locks = LockManager::with_dir(dir.path().join("locks"))
        .with_poll_interval(Duration::from_millis(10));
    let checkpoints = CheckpointConfig {
        dir: dir.path().join("checkpoints"),
        interval: 2,
    };
    let dedup_config = DedupConfig {
        hash_fields: vec![silverledger::dedup::HashField::Text],
        enable_near_dup: false,
        ..Default::default()
    };

    let mut first = IngestRun::start(&locks, &checkpoints, "bbc", Duration::ZERO)
        .await
        .unwrap();
    let mut dedup = DedupEngine::new(dedup_config.clone()).unwrap();
    assert_eq!(ingest(&mut first, &ledger, &mut dedup, Some(4)).await, 5);
    // Crash: no finish, the lock guard is dropped with the run.
    drop(first);
    assert!(!locks.is_locked("bbc"));

    // The checkpoint was written at record 4, so record 4 is replayed.
    let mut second = IngestRun::start(&locks, &checkpoints, "bbc", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(second.start_index(), 4);
    let mut dedup = DedupEngine::new(dedup_config).unwrap();
    // The ledger keeps the replayed record from being processed twice.
    assert_eq!(ingest(&mut second, &ledger, &mut dedup, None).await, 1);
    assert_eq!(second.next_index(), 6);
    second.finish(Some(&dedup)).unwrap();

    assert!(!locks.is_locked("bbc"));
    assert_eq!(load_checkpoint(&checkpoints.dir.join(".checkpoint-bbc.json")), 0);

    let stats = ledger.get_statistics(Some("bbc")).await.unwrap();
    assert_eq!(stats.total_urls, 6);
    assert_eq!(stats.unique_documents, 5);
    let dup = ledger
        .get_entry("https://bbc.example/2", "bbc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dup.duplicate_of(), Some("https://bbc.example/0"));
}

#[tokio::test]
async fn test_concurrent_runs_for_one_source_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let locks = LockManager::with_dir(dir.path()).with_poll_interval(Duration::from_millis(5));
    let checkpoints = CheckpointConfig {
        dir: dir.path().join("checkpoints"),
        interval: 10,
    };

    let (a, b) = tokio::join!(
        IngestRun::start(&locks, &checkpoints, "cnn", Duration::from_millis(50)),
        IngestRun::start(&locks, &checkpoints, "cnn", Duration::from_millis(50)),
    );
    let (winner, loser) = match (a, b) {
        (Ok(run), Err(e)) | (Err(e), Ok(run)) => (run, e),
        _ => panic!("exactly one run should hold the lock"),
    };
    assert!(matches!(
        loser,
        RunError::Lock(LockError::AlreadyRunning { ref source_name, .. }) if source_name == "cnn"
    ));

    // Other sources are unaffected.
    let other = IngestRun::start(&locks, &checkpoints, "bbc", Duration::ZERO)
        .await
        .unwrap();
    other.finish(None).unwrap();

    winner.finish(None).unwrap();
    let again = IngestRun::start(&locks, &checkpoints, "cnn", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(again.start_index(), 0);
}

#[tokio::test]
async fn test_waiting_run_proceeds_once_lock_is_freed() {
    let dir = tempfile::tempdir().unwrap();
    let locks = LockManager::with_dir(dir.path()).with_poll_interval(Duration::from_millis(10));
    let held = locks.try_acquire("reuters").unwrap().unwrap();

    let release = async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        held.release().unwrap();
    };
    let (acquired, ()) = tokio::join!(
        locks.acquire_lock("reuters", Duration::from_secs(5)),
        release
    );
    let lock = acquired.unwrap();
    assert_eq!(lock.source(), "reuters");
    assert!(locks.is_locked("reuters"));
}

#[test]
fn test_corrupt_checkpoint_restarts_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".checkpoint-bbc.json");

    std::fs::write(&path, b"{ not json").unwrap();
    assert_eq!(load_checkpoint(&path), 0);
    assert!(read_checkpoint(&path).is_none());

    std::fs::write(&path, b"").unwrap();
    assert_eq!(load_checkpoint(&path), 0);
}

#[test]
fn test_checkpoint_save_replaces_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join(".checkpoint-bbc.json");

    for index in [10, 20, 30] {
        save_checkpoint(&path, &Checkpoint::new("run-1", index)).unwrap();
    }
    assert_eq!(load_checkpoint(&path), 30);

    let files: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from(".checkpoint-bbc.json")]);

    let body = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["run_id"], "run-1");
    assert_eq!(value["last_index"], 30);
    assert!(value["timestamp"].is_string());
}

#[test]
fn test_stale_lock_cleanup_frees_source() {
    let dir = tempfile::tempdir().unwrap();
    let locks = LockManager::with_dir(dir.path());

    let abandoned = locks.try_acquire("afp").unwrap().unwrap();
    let path = abandoned.path().to_path_buf();
    // Simulate a crashed holder that never removed its file.
    std::mem::forget(abandoned);

    assert!(locks.cleanup_stale_locks(1).unwrap().is_empty());
    assert!(locks.is_locked("afp"));

    let old = std::time::SystemTime::now() - Duration::from_secs(3 * 3600);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(old)
        .unwrap();

    assert_eq!(locks.cleanup_stale_locks(1).unwrap(), vec!["afp".to_string()]);
    assert!(locks.try_acquire("afp").unwrap().is_some());
}
