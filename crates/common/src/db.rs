use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;

/// Open the worker's PostgreSQL pool, if one is configured.
///
/// Returns `Ok(None)` when `DATABASE_URL` is unset; message processing then
/// runs without a surrounding transaction.
pub async fn connect_if_configured(config: &AppConfig) -> anyhow::Result<Option<PgPool>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::info!("DATABASE_URL not set, processing messages without transactions");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Connected to PostgreSQL"
    );
    Ok(Some(pool))
}
