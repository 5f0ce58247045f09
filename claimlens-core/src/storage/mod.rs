//! Corpus storage behind a single `Storage` trait.
//!
//! `PgStorage` is the durable Postgres adapter; `MemoryStorage` is the
//! in-process double used throughout the test suites. All writes are keyed
//! upserts (last-write-wins) and the market→embedding delete cascades, so
//! no locking is needed on top.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CacheEntry, Embedding, Market, QueryLogEntry, RealtimePrice};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

/// Persistent keyed storage for markets, embeddings, prices, cache entries
/// and the append-only query log.
#[async_trait]
pub trait Storage: Send + Sync {
    // -- markets ---------------------------------------------------------
    async fn upsert_market(&self, market: &Market) -> Result<(), StorageError>;
    async fn get_market(&self, market_id: &str) -> Result<Option<Market>, StorageError>;
    async fn all_markets(&self) -> Result<Vec<Market>, StorageError>;
    async fn market_count(&self) -> Result<u64, StorageError>;
    /// Deletes the market and, via cascade, its embedding.
    async fn delete_market(&self, market_id: &str) -> Result<(), StorageError>;

    // -- embeddings ------------------------------------------------------
    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StorageError>;
    async fn get_embedding(&self, market_id: &str) -> Result<Option<Embedding>, StorageError>;
    /// Every embedding produced by `model`; mixed-model rows are excluded
    /// so cross-model similarity is never computed.
    async fn all_embeddings(&self, model: &str) -> Result<Vec<Embedding>, StorageError>;
    /// Markets with no embedding for `model`, oldest-ingested first.
    async fn markets_missing_embedding(
        &self,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Market>, StorageError>;

    // -- realtime prices -------------------------------------------------
    async fn upsert_realtime_price(&self, price: &RealtimePrice) -> Result<(), StorageError>;
    /// Most recently updated price row for the market, any token.
    async fn latest_realtime_price(
        &self,
        market_id: &str,
    ) -> Result<Option<RealtimePrice>, StorageError>;

    // -- ttl cache -------------------------------------------------------
    async fn cache_get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;
    async fn cache_put(&self, entry: &CacheEntry) -> Result<(), StorageError>;

    // -- query log -------------------------------------------------------
    async fn append_query_log(&self, entry: &QueryLogEntry) -> Result<(), StorageError>;
    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLogEntry>, StorageError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Shared helper: does a cache entry still count as fresh at `now`?
pub fn cache_entry_is_fresh(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    entry.expires_at > now
}
