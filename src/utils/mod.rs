//! Shared file helpers for lock and checkpoint files and the near-duplicate index.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Write `contents` to `path` so readers only ever see the old or the new file.
///
/// Data goes to a temp file in the same directory, is synced, then renamed over
/// `path`; on unix the directory is synced too so the rename survives a crash.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;

    Ok(())
}

/// Turn an arbitrary key (a source name, a run key) into a safe file stem.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`. When that changes the key, a short
/// hash of the original is appended so distinct keys never share a file.
pub fn file_safe_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');

    if sanitized == key && !key.is_empty() {
        return sanitized.to_string();
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}-{}", sanitized, &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_names_pass_through() {
        assert_eq!(file_safe_name("bbc"), "bbc");
        assert_eq!(file_safe_name("common-crawl_2026.03"), "common-crawl_2026.03");
    }

    #[test]
    fn test_unsafe_names_get_distinct_suffixes() {
        let a = file_safe_name("news/bbc");
        let b = file_safe_name("news:bbc");
        assert!(a.starts_with("news_bbc-"));
        assert!(b.starts_with("news_bbc-"));
        assert_ne!(a, b);
        assert!(!file_safe_name("../etc").contains('/'));
        assert!(!file_safe_name("").is_empty());
    }

    #[test]
    fn test_write_atomic_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"first version, fairly long").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
