//! Data models for the crawl ledger.

mod feed;
mod file_checksum;
mod ledger_entry;
mod quota;

pub use feed::RssFeedState;
pub use file_checksum::FileChecksumRecord;
pub use ledger_entry::{
    decode_signature, encode_signature, EntryMetadata, EntryState, FetchInfo, LedgerEntry,
    ProcessedInfo,
};
pub use quota::{DailyQuota, QuotaStatus};
