// ABOUTME: PostgreSQL connection handling for the destination database
// ABOUTME: Opens TLS-capable connections and provides the LocalStore implementation

pub mod store;

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::Client;

pub use store::PostgresStore;

use crate::utils::{sanitize_url, validate_connection_string};

/// Connect to PostgreSQL.
///
/// TLS is negotiated according to the URL's `sslmode` (default `prefer`).
/// `allow_self_signed_certs` disables certificate and hostname verification and
/// is only meant for testing.
pub async fn connect(url: &str, allow_self_signed_certs: bool) -> Result<Client> {
    validate_connection_string(url)?;

    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed_certs)
        .danger_accept_invalid_hostnames(allow_self_signed_certs)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    // The connection object performs the actual communication; it runs until the
    // client is dropped.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    tracing::debug!("Connected to {}", sanitize_url(url));
    Ok(client)
}
