//! Database plumbing shared by the ledger backends.
//!
//! Connection sources, schema migrations and Diesel row types live here; the
//! ledger's query logic lives in `crate::ledger`.

pub mod diesel_models;
pub mod migrations;
#[cfg(feature = "postgres")]
pub mod pg_tls;
pub mod pool;
pub mod util;

pub use migrations::run_migrations;
#[cfg(feature = "postgres")]
pub use pool::{PgConn, PgPool, PgPoolOptions};
pub use pool::{SqliteConn, SqlitePool};
pub use util::{parse_datetime, redact_url_password, timestamp};
