// ABOUTME: Shared PostgreSQL connection helpers used by all database-facing components
// ABOUTME: TLS setup, credential handling, table listing, and identifier quoting

use std::time::Duration;

use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::Client;

use crate::environment::EnvironmentCredentials;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a client connection to the environment described by `credentials`.
/// The password field, when set, overrides whatever the URL carries. The
/// connection task is spawned onto the runtime and lives until the client
/// is dropped.
pub async fn connect(credentials: &EnvironmentCredentials) -> Result<Client> {
    let mut config = credentials
        .url
        .parse::<tokio_postgres::Config>()
        .with_context(|| format!("Invalid database URL '{}'", credentials.url))?;

    if let Some(password) = credentials.password.as_deref() {
        if !password.is_empty() {
            config.password(password);
        }
    }
    config.connect_timeout(CONNECT_TIMEOUT);

    let tls = native_tls::TlsConnector::builder()
        .build()
        .context("Failed to build TLS connector")?;
    let (client, connection) = config
        .connect(MakeTlsConnector::new(tls))
        .await
        .context("Failed to connect to database environment")?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!("database connection closed: {}", err);
        }
    });

    Ok(client)
}

/// List user tables in the public schema, sorted by name.
pub async fn list_public_tables(client: &Client) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT tablename::text FROM pg_tables \
             WHERE schemaname = 'public' ORDER BY tablename",
            &[],
        )
        .await
        .context("Failed to list public tables")?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Quote an identifier for interpolation into dynamically-built SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_wraps_and_escapes() {
        assert_eq!(quote_ident("bookings"), "\"bookings\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[tokio::test]
    async fn connect_rejects_unparseable_urls() {
        let creds = EnvironmentCredentials::new("not a url at all", "key");
        let err = connect(&creds).await.unwrap_err();
        assert!(err.to_string().contains("Invalid database URL"));
    }
}
