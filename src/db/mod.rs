use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Initialize the PostgreSQL connection pool.
///
/// Sized for this service's profile: a handful of concurrent API requests
/// plus the single worker task. Conversion never fans out queries, so a
/// small pool is enough.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Apply the embedded migrations (jobs and geo_records tables).
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;
