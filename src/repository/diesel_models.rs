//! Diesel ORM models for the ledger tables and their conversions to domain models.
//!
//! Timestamps, signatures and metadata are stored as text so the same rows work
//! unchanged on SQLite and PostgreSQL.

use diesel::prelude::*;

use super::util::{date_key, parse_date, parse_datetime, timestamp, to_i64, to_u64};
use crate::models::{
    decode_signature, encode_signature, DailyQuota, EntryMetadata, EntryState,
    FileChecksumRecord, LedgerEntry, RssFeedState,
};
use crate::schema;

/// Ledger entry record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::ledger_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LedgerEntryRecord {
    pub id: i32,
    pub url: String,
    pub source: String,
    pub state: String,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<String>,
    pub silver_id: Option<String>,
    pub http_status: Option<i32>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
    pub processed_at: Option<String>,
}

/// New ledger entry for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ledger_entries)]
pub struct NewLedgerEntry<'a> {
    pub url: &'a str,
    pub source: &'a str,
    pub state: &'a str,
    pub text_hash: Option<&'a str>,
    pub minhash_signature: Option<&'a str>,
    pub silver_id: Option<&'a str>,
    pub http_status: Option<i32>,
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
    pub content_length: Option<i64>,
    pub error_message: Option<&'a str>,
    pub retry_count: i32,
    pub metadata: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub processed_at: Option<&'a str>,
}

/// Text columns of an entry that need encoding before insert.
pub struct EncodedEntry {
    metadata: String,
    signature: Option<String>,
    created_at: String,
    updated_at: String,
    processed_at: Option<String>,
}

impl EncodedEntry {
    pub fn new(entry: &LedgerEntry) -> Result<Self, serde_json::Error> {
        Ok(Self {
            metadata: serde_json::to_string(&entry.metadata)?,
            signature: entry.minhash_signature.as_deref().map(encode_signature),
            created_at: timestamp(entry.created_at),
            updated_at: timestamp(entry.updated_at),
            processed_at: entry.processed_at.map(timestamp),
        })
    }

    pub fn insertable<'a>(&'a self, entry: &'a LedgerEntry) -> NewLedgerEntry<'a> {
        NewLedgerEntry {
            url: &entry.url,
            source: &entry.source,
            state: entry.state.as_str(),
            text_hash: entry.text_hash.as_deref(),
            minhash_signature: self.signature.as_deref(),
            silver_id: entry.silver_id.as_deref(),
            http_status: entry.http_status.map(i32::from),
            etag: entry.etag.as_deref(),
            last_modified: entry.last_modified.as_deref(),
            content_length: entry.content_length.map(to_i64),
            error_message: entry.error_message.as_deref(),
            retry_count: i32::try_from(entry.retry_count).unwrap_or(i32::MAX),
            metadata: &self.metadata,
            created_at: &self.created_at,
            updated_at: &self.updated_at,
            processed_at: self.processed_at.as_deref(),
        }
    }
}

/// Partial update applied by a state transition. `None` fields are left untouched;
/// `Some(None)` writes NULL.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = schema::ledger_entries)]
pub struct EntryChangeset<'a> {
    pub state: &'a str,
    pub text_hash: Option<&'a str>,
    pub minhash_signature: Option<Option<&'a str>>,
    pub silver_id: Option<Option<&'a str>>,
    pub http_status: Option<i32>,
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
    pub content_length: Option<i64>,
    pub metadata: Option<&'a str>,
    pub updated_at: &'a str,
    pub processed_at: Option<&'a str>,
}

impl From<LedgerEntryRecord> for LedgerEntry {
    fn from(record: LedgerEntryRecord) -> Self {
        let metadata: EntryMetadata = serde_json::from_str(&record.metadata).unwrap_or_default();
        LedgerEntry {
            id: Some(i64::from(record.id)),
            state: EntryState::from_str(&record.state).unwrap_or(EntryState::Discovered),
            text_hash: record.text_hash,
            minhash_signature: record.minhash_signature.as_deref().and_then(decode_signature),
            silver_id: record.silver_id,
            http_status: record.http_status.and_then(|s| u16::try_from(s).ok()),
            etag: record.etag,
            last_modified: record.last_modified,
            content_length: record.content_length.map(to_u64),
            error_message: record.error_message,
            retry_count: u32::try_from(record.retry_count).unwrap_or(0),
            metadata,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            processed_at: record.processed_at.as_deref().map(parse_datetime),
            url: record.url,
            source: record.source,
        }
    }
}

/// Daily quota record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::daily_quotas)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailyQuotaRecord {
    pub quota_date: String,
    pub source: String,
    pub records_ingested: i64,
    pub quota_limit: Option<i64>,
    pub items_remaining: Option<i64>,
    pub quota_hit: i32,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::daily_quotas)]
pub struct NewDailyQuota<'a> {
    pub quota_date: &'a str,
    pub source: &'a str,
    pub records_ingested: i64,
    pub quota_limit: Option<i64>,
    pub items_remaining: Option<i64>,
    pub quota_hit: i32,
    pub updated_at: &'a str,
}

impl<'a> NewDailyQuota<'a> {
    pub fn from_quota(quota: &'a DailyQuota, quota_date: &'a str, updated_at: &'a str) -> Self {
        Self {
            quota_date,
            source: &quota.source,
            records_ingested: to_i64(quota.records_ingested),
            quota_limit: quota.quota_limit.map(to_i64),
            items_remaining: quota.items_remaining.map(to_i64),
            quota_hit: i32::from(quota.quota_hit),
            updated_at,
        }
    }
}

impl DailyQuotaRecord {
    /// None when the stored date cannot be parsed.
    pub fn into_quota(self) -> Option<DailyQuota> {
        Some(DailyQuota {
            date: parse_date(&self.quota_date)?,
            source: self.source,
            records_ingested: to_u64(self.records_ingested),
            quota_limit: self.quota_limit.map(to_u64),
            items_remaining: self.items_remaining.map(to_u64),
            quota_hit: self.quota_hit != 0,
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

/// Storage key for a quota row's date.
pub fn quota_date_key(quota: &DailyQuota) -> String {
    date_key(quota.date)
}

/// RSS feed state record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::rss_feed_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RssFeedRecord {
    pub feed_url: String,
    pub last_fetch_time: String,
    pub items_found: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::rss_feed_state)]
pub struct NewRssFeed<'a> {
    pub feed_url: &'a str,
    pub last_fetch_time: &'a str,
    pub items_found: i64,
}

impl From<RssFeedRecord> for RssFeedState {
    fn from(record: RssFeedRecord) -> Self {
        RssFeedState {
            feed_url: record.feed_url,
            last_fetch_time: parse_datetime(&record.last_fetch_time),
            items_found: to_u64(record.items_found),
        }
    }
}

/// File checksum record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::file_checksums)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FileChecksumRow {
    pub checksum: String,
    pub source: String,
    pub file_path: String,
    pub record_count: i64,
    pub processed_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::file_checksums)]
pub struct NewFileChecksum<'a> {
    pub checksum: &'a str,
    pub source: &'a str,
    pub file_path: &'a str,
    pub record_count: i64,
    pub processed_at: &'a str,
}

impl<'a> NewFileChecksum<'a> {
    pub fn from_record(record: &'a FileChecksumRecord, processed_at: &'a str) -> Self {
        Self {
            checksum: &record.checksum,
            source: &record.source,
            file_path: &record.file_path,
            record_count: to_i64(record.record_count),
            processed_at,
        }
    }
}

impl From<FileChecksumRow> for FileChecksumRecord {
    fn from(row: FileChecksumRow) -> Self {
        FileChecksumRecord {
            checksum: row.checksum,
            source: row.source,
            file_path: row.file_path,
            record_count: to_u64(row.record_count),
            processed_at: parse_datetime(&row.processed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_entry_borrows_entry_fields() {
        let mut entry = LedgerEntry::new("https://example.com/a", "bbc");
        entry.state = EntryState::Processed;
        entry.text_hash = Some("abc".into());
        entry.minhash_signature = Some(vec![1, 2]);
        entry.http_status = Some(200);

        let encoded = EncodedEntry::new(&entry).unwrap();
        let row = encoded.insertable(&entry);
        assert_eq!(row.state, "processed");
        assert_eq!(row.text_hash, Some("abc"));
        assert_eq!(row.http_status, Some(200));
        assert_eq!(row.metadata, "{}");
        assert_eq!(row.minhash_signature.map(str::len), Some(32));
    }

    #[test]
    fn test_record_with_unknown_state_reads_as_discovered() {
        let record = LedgerEntryRecord {
            id: 7,
            url: "https://example.com/a".into(),
            source: "bbc".into(),
            state: "mystery".into(),
            text_hash: None,
            minhash_signature: Some("not-hex".into()),
            silver_id: None,
            http_status: Some(-1),
            etag: None,
            last_modified: None,
            content_length: Some(-5),
            error_message: None,
            retry_count: 2,
            metadata: "not json".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            updated_at: "2026-01-01T00:00:00.000000Z".into(),
            processed_at: None,
        };
        let entry = LedgerEntry::from(record);
        assert_eq!(entry.id, Some(7));
        assert_eq!(entry.state, EntryState::Discovered);
        assert_eq!(entry.minhash_signature, None);
        assert_eq!(entry.http_status, None);
        assert_eq!(entry.content_length, Some(0));
        assert_eq!(entry.retry_count, 2);
        assert!(entry.metadata.is_empty());
        assert_eq!(entry.processed_at, None);
    }
}
