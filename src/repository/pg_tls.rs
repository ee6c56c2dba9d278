//! PostgreSQL TLS connection helpers using rustls.
//!
//! Used by the ledger pool and by the migration runner. TLS is on by default;
//! set `SILVER_NO_TLS=1` (or `no_tls` in the ledger config) to disable it.

use diesel::ConnectionError;
use diesel_async::AsyncPgConnection;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::warn;

fn build_rustls_config() -> ClientConfig {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!("Skipping unreadable native certificate: {}", err);
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(loaded.certs);
    if ignored > 0 {
        warn!("Ignored {} unparsable native certificates ({} loaded)", ignored, added);
    }

    ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

pub fn make_tls_connector() -> MakeRustlsConnect {
    MakeRustlsConnect::new(build_rustls_config())
}

/// Connection setup hook for the diesel-async pool manager.
pub fn establish_tls_connection(
    url: &str,
) -> BoxFuture<'_, diesel::ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let tls = make_tls_connector();
        let (client, conn) = tokio_postgres::connect(url, tls)
            .await
            .map_err(|e| ConnectionError::BadConnection(super::util::pg_error_message(&e)))?;

        AsyncPgConnection::try_from_client_and_connection(client, conn).await
    };
    fut.boxed()
}

/// Open a plain tokio-postgres client, driving its connection on a background task.
///
/// Migrations run over this client rather than through the pool.
pub async fn connect_raw(
    url: &str,
    no_tls: bool,
) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    if no_tls {
        let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls).await?;
        tokio::spawn(drive(connection));
        Ok(client)
    } else {
        let (client, connection) = tokio_postgres::connect(url, make_tls_connector()).await?;
        tokio::spawn(drive(connection));
        Ok(client)
    }
}

async fn drive<F>(connection: F)
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>>,
{
    if let Err(e) = connection.await {
        tracing::error!("Ledger migration connection failed: {}", super::util::pg_error_message(&e));
    }
}
