//! PostgreSQL adapters - Database implementations for storage ports.
//!
//! - `PostgresAgreementLedger` - Agreements and payments with version-guarded updates
//! - `PostgresEventDeduplicator` - Processed event claims
//! - `PostgresDunningStore` - Pending dunning follow-ups
//!
//! Schema lives in `migrations/` and is applied by `run_migrations`.

mod agreement_ledger;
mod dunning_store;
mod event_deduplicator;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

pub use agreement_ledger::PostgresAgreementLedger;
pub use dunning_store::PostgresDunningStore;
pub use event_deduplicator::PostgresEventDeduplicator;

/// Opens a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.url)
        .await?;

    tracing::info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Applies pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
