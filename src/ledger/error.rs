//! Ledger error taxonomy.
//!
//! Driver, pool and query errors from either backend are classified here so callers can
//! tell transient failures (`Timeout`, `BackendUnavailable`) from rejected state transitions.

use thiserror::Error;

use crate::models::EntryState;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no ledger entry for {url} in source '{source_name}'")]
    NotFound { url: String, source_name: String },

    #[error("invalid transition for {url}: {from} -> {to}")]
    InvalidTransition {
        url: String,
        from: EntryState,
        to: EntryState,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ledger backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("ledger operation timed out: {0}")]
    Timeout(String),

    #[error("ledger configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("verification failed for table {table}: source has {source_rows} rows, target has {target_rows}")]
    Verification {
        table: &'static str,
        source_rows: u64,
        target_rows: u64,
    },

    #[error("migration error: {0}")]
    Migration(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::BackendUnavailable(_))
    }
}

fn is_timeout_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("statement timeout")
        || message.contains("canceling statement")
}

impl From<diesel::result::Error> for LedgerError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        let message = e.to_string();
        match e {
            Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
                Self::BackendUnavailable(message)
            }
            Error::DatabaseError(..) if is_timeout_message(&message) => Self::Timeout(message),
            Error::BrokenTransactionManager => Self::BackendUnavailable(message),
            _ => Self::Database(message),
        }
    }
}

impl From<diesel::ConnectionError> for LedgerError {
    fn from(e: diesel::ConnectionError) -> Self {
        Self::BackendUnavailable(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool::managed::PoolError<diesel_async::pooled_connection::PoolError>>
    for LedgerError
{
    fn from(e: deadpool::managed::PoolError<diesel_async::pooled_connection::PoolError>) -> Self {
        use deadpool::managed::PoolError;

        match e {
            PoolError::Timeout(kind) => {
                Self::Timeout(format!("waiting for a pooled connection ({kind:?})"))
            }
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::{DatabaseErrorKind, Error};

    fn database_error(message: &str) -> Error {
        Error::DatabaseError(DatabaseErrorKind::Unknown, Box::new(message.to_string()))
    }

    #[test]
    fn test_locked_database_is_timeout() {
        let err = database_error("database is locked");
        assert!(matches!(LedgerError::from(err), LedgerError::Timeout(_)));
    }

    #[test]
    fn test_other_database_errors_are_not_transient() {
        let err = database_error("no such table: ledger_entries");
        let mapped = LedgerError::from(err);
        assert!(matches!(mapped, LedgerError::Database(_)));
        assert!(!mapped.is_transient());
    }

    #[test]
    fn test_not_found_message_names_source() {
        let err = LedgerError::NotFound {
            url: "https://example.com/a".into(),
            source_name: "bbc".into(),
        };
        assert_eq!(
            err.to_string(),
            "no ledger entry for https://example.com/a in source 'bbc'"
        );
    }
}
