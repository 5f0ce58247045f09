//! Connection pool construction and startup checks.

use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Server and pgvector versions, verified at startup so a missing vector
/// extension fails fast instead of at the first embedding upsert.
pub async fn startup_check(pool: &PgPool) -> Result<(String, String), sqlx::Error> {
    let (server,): (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    let (vector,): (String,) =
        sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
            .fetch_one(pool)
            .await?;
    Ok((server, vector))
}
