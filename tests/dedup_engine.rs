//! Dedup engine behaviour across the cache, the LSH index and persistence.

use std::path::Path;

use silverledger::dedup::{content_hash, file_checksum, HashField};
use silverledger::{DedupConfig, DedupEngine, DuplicateType};

fn article(words: usize, tail: &str) -> String {
    let mut text: Vec<String> = (0..words).map(|i| format!("word{i}")).collect();
    text.push(tail.to_string());
    text.join(" ")
}

fn near_dup_config(index_path: Option<&Path>) -> DedupConfig {
    DedupConfig {
        hash_fields: vec![HashField::Text],
        similarity_threshold: 0.8,
        num_perm: 128,
        num_shards: 4,
        index_path: index_path.map(Path::to_path_buf),
        ..Default::default()
    }
}

#[test]
fn test_lru_cache_forgets_oldest_hash() {
    let mut engine = DedupEngine::new(DedupConfig {
        hash_fields: vec![HashField::Text],
        enable_near_dup: false,
        cache_size: 2,
        ..Default::default()
    })
    .unwrap();

    for (text, url) in [("alpha", "https://a/1"), ("beta", "https://a/2"), ("gamma", "https://a/3")] {
        assert!(!engine.process_document(text, url).is_duplicate);
    }
    assert_eq!(engine.cache_len(), 2);

    // The newest hash is still cached.
    let gamma = engine.process_document("gamma", "https://a/4");
    assert!(gamma.is_duplicate);
    assert_eq!(gamma.similar_url.as_deref(), Some("https://a/3"));

    // The oldest was evicted, so it reads as new. The ledger hash lookup covers this gap.
    assert!(!engine.process_document("alpha", "https://a/5").is_duplicate);
}

#[test]
fn test_hash_fields_change_exact_matching() {
    let mut by_text = DedupEngine::new(DedupConfig {
        hash_fields: vec![HashField::Text],
        enable_near_dup: false,
        ..Default::default()
    })
    .unwrap();
    by_text.process_document("syndicated story", "https://a/1");
    assert!(by_text
        .process_document("syndicated story", "https://b/1")
        .is_duplicate);

    let mut by_text_and_url = DedupEngine::new(DedupConfig {
        enable_near_dup: false,
        ..Default::default()
    })
    .unwrap();
    by_text_and_url.process_document("syndicated story", "https://a/1");
    assert!(!by_text_and_url
        .process_document("syndicated story", "https://b/1")
        .is_duplicate);

    assert_eq!(
        by_text_and_url
            .process_document("syndicated story", "https://a/1")
            .text_hash,
        content_hash(&[HashField::Text, HashField::Url], "syndicated story", "https://a/1")
    );
}

#[test]
fn test_near_duplicate_detected() {
    let mut engine = DedupEngine::new(near_dup_config(None)).unwrap();

    let original = engine.process_document(&article(200, "ending"), "https://a/original");
    assert!(!original.is_duplicate);
    assert_eq!(original.signature.as_ref().map(|s| s.len()), Some(128));

    let edited = engine.process_document(&article(200, "revised"), "https://a/edited");
    assert!(edited.is_duplicate);
    assert_eq!(edited.duplicate_type, Some(DuplicateType::Near));
    assert_eq!(edited.similar_url.as_deref(), Some("https://a/original"));
    assert!(edited.similarity.unwrap() >= 0.8);
    assert_ne!(edited.text_hash, original.text_hash);

    let unrelated: String = (0..200).map(|i| format!("other{i} ")).collect();
    assert!(!engine.process_document(&unrelated, "https://a/other").is_duplicate);

    let stats = engine.stats();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.near_duplicates, 1);
    assert_eq!(stats.unique, 2);
    assert_eq!(engine.index_len(), 2);
}

#[test]
fn test_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index").join("lsh.json");

    let mut first_run = DedupEngine::new(near_dup_config(Some(&path))).unwrap();
    first_run.process_document(&article(150, "first"), "https://a/1");
    assert!(first_run.save_index().unwrap());
    assert!(path.exists());

    let mut second_run = DedupEngine::new(near_dup_config(Some(&path))).unwrap();
    assert_eq!(second_run.index_len(), 1);
    assert!(second_run.index().unwrap().contains_key("https://a/1"));

    // The exact cache starts empty, so only the index catches this.
    let outcome = second_run.process_document(&article(150, "second"), "https://b/1");
    assert_eq!(outcome.duplicate_type, Some(DuplicateType::Near));
    assert_eq!(outcome.similar_url.as_deref(), Some("https://a/1"));
}

#[test]
fn test_reload_with_different_shard_count_rebuilds_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsh.json");

    let mut engine = DedupEngine::new(near_dup_config(Some(&path))).unwrap();
    engine.process_document(&article(150, "x"), "https://a/1");
    engine.save_index().unwrap();

    let mut resharded = DedupEngine::new(DedupConfig {
        num_shards: 9,
        ..near_dup_config(Some(&path))
    })
    .unwrap();
    assert_eq!(resharded.index().unwrap().num_shards(), 9);
    assert_eq!(resharded.index_len(), 1);
    assert!(resharded
        .process_document(&article(150, "y"), "https://a/2")
        .is_duplicate);
}

#[test]
fn test_corrupt_index_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsh.json");
    std::fs::write(&path, b"{ not an index").unwrap();

    let mut engine = DedupEngine::new(near_dup_config(Some(&path))).unwrap();
    assert_eq!(engine.index_len(), 0);

    engine.process_document(&article(100, "z"), "https://a/1");
    assert!(engine.save_index().unwrap());
    let reloaded = DedupEngine::new(near_dup_config(Some(&path))).unwrap();
    assert_eq!(reloaded.index_len(), 1);
}

#[test]
fn test_index_with_other_permutation_count_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsh.json");

    let mut engine = DedupEngine::new(near_dup_config(Some(&path))).unwrap();
    engine.process_document(&article(100, "z"), "https://a/1");
    engine.save_index().unwrap();

    let other = DedupEngine::new(DedupConfig {
        num_perm: 64,
        ..near_dup_config(Some(&path))
    })
    .unwrap();
    assert_eq!(other.index_len(), 0);
}

#[test]
fn test_file_checksum_matches_content() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.jsonl");
    let b = dir.path().join("b.jsonl");
    std::fs::write(&a, b"{\"url\":\"https://a/1\"}\n").unwrap();
    std::fs::write(&b, b"{\"url\":\"https://a/1\"}\n").unwrap();

    let sum = file_checksum(&a).unwrap();
    assert_eq!(sum.len(), 64);
    assert_eq!(sum, file_checksum(&b).unwrap());

    std::fs::write(&b, b"{\"url\":\"https://a/2\"}\n").unwrap();
    assert_ne!(sum, file_checksum(&b).unwrap());
    assert!(file_checksum(&dir.path().join("missing")).is_err());
}
