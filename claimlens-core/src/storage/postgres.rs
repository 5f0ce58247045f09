//! Postgres adapter for the `Storage` trait.
//!
//! All statements are keyed upserts or plain selects; the market→embedding
//! cascade lives in the schema (`ON DELETE CASCADE`), not in code. The
//! nullable token id on realtime prices is stored as an empty string so it
//! can participate in the composite primary key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CacheEntry, Embedding, Market, QueryLogEntry, RealtimePrice};

use super::{Storage, StorageError};

type MarketRow = (
    String,                // market_id
    String,                // title
    String,                // description
    Option<String>,        // slug
    Option<String>,        // url
    Option<DateTime<Utc>>, // end_date
    Vec<String>,           // outcomes
    Option<f64>,           // volume
    Option<f64>,           // liquidity
    DateTime<Utc>,         // last_ingested_at
);

const MARKET_COLUMNS: &str = "market_id, title, description, slug, url, end_date, \
     outcomes, volume, liquidity, last_ingested_at";

fn market_from_row(row: MarketRow) -> Market {
    let (market_id, title, description, slug, url, end_date, outcomes, volume, liquidity, last_ingested_at) =
        row;
    Market {
        market_id,
        title,
        description,
        slug,
        url,
        end_date,
        outcomes,
        volume,
        liquidity,
        last_ingested_at,
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations from the crate's `migrations/` directory.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn upsert_market(&self, market: &Market) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO markets (market_id, title, description, slug, url, end_date,
                                 outcomes, volume, liquidity, last_ingested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (market_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                slug = EXCLUDED.slug,
                url = EXCLUDED.url,
                end_date = EXCLUDED.end_date,
                outcomes = EXCLUDED.outcomes,
                volume = EXCLUDED.volume,
                liquidity = EXCLUDED.liquidity,
                last_ingested_at = EXCLUDED.last_ingested_at
            "#,
        )
        .bind(&market.market_id)
        .bind(&market.title)
        .bind(&market.description)
        .bind(&market.slug)
        .bind(&market.url)
        .bind(market.end_date)
        .bind(&market.outcomes)
        .bind(market.volume)
        .bind(market.liquidity)
        .bind(market.last_ingested_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>, StorageError> {
        let row: Option<MarketRow> = sqlx::query_as(&format!(
            "SELECT {MARKET_COLUMNS} FROM markets WHERE market_id = $1"
        ))
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(market_from_row))
    }

    async fn all_markets(&self) -> Result<Vec<Market>, StorageError> {
        let rows: Vec<MarketRow> = sqlx::query_as(&format!(
            "SELECT {MARKET_COLUMNS} FROM markets ORDER BY market_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(market_from_row).collect())
    }

    async fn market_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn delete_market(&self, market_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM markets WHERE market_id = $1")
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (market_id, embedding, model, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (market_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                model = EXCLUDED.model,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&embedding.market_id)
        .bind(Vector::from(embedding.vector.clone()))
        .bind(&embedding.model)
        .bind(embedding.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_embedding(&self, market_id: &str) -> Result<Option<Embedding>, StorageError> {
        let row: Option<(String, Vector, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT market_id, embedding, model, updated_at FROM embeddings WHERE market_id = $1",
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(market_id, vector, model, updated_at)| Embedding {
            market_id,
            vector: vector.as_slice().to_vec(),
            model,
            updated_at,
        }))
    }

    async fn all_embeddings(&self, model: &str) -> Result<Vec<Embedding>, StorageError> {
        let rows: Vec<(String, Vector, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT market_id, embedding, model, updated_at FROM embeddings WHERE model = $1",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(market_id, vector, model, updated_at)| Embedding {
                market_id,
                vector: vector.as_slice().to_vec(),
                model,
                updated_at,
            })
            .collect())
    }

    async fn markets_missing_embedding(
        &self,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Market>, StorageError> {
        let rows: Vec<MarketRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MARKET_COLUMNS}
            FROM markets m
            WHERE NOT EXISTS (
                SELECT 1 FROM embeddings e
                WHERE e.market_id = m.market_id AND e.model = $1
            )
            ORDER BY m.last_ingested_at ASC
            LIMIT $2
            "#
        ))
        .bind(model)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(market_from_row).collect())
    }

    async fn upsert_realtime_price(&self, price: &RealtimePrice) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO realtime_prices (market_id, token_id, price, bid, ask,
                                         spread, volume, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (market_id, token_id) DO UPDATE SET
                price = EXCLUDED.price,
                bid = EXCLUDED.bid,
                ask = EXCLUDED.ask,
                spread = EXCLUDED.spread,
                volume = EXCLUDED.volume,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(&price.market_id)
        .bind(price.token_id.as_deref().unwrap_or(""))
        .bind(price.price)
        .bind(price.bid)
        .bind(price.ask)
        .bind(price.spread)
        .bind(price.volume)
        .bind(price.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_realtime_price(
        &self,
        market_id: &str,
    ) -> Result<Option<RealtimePrice>, StorageError> {
        type PriceRow = (
            String,
            String,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            DateTime<Utc>,
        );
        let row: Option<PriceRow> = sqlx::query_as(
            r#"
            SELECT market_id, token_id, price, bid, ask, spread, volume, last_updated
            FROM realtime_prices
            WHERE market_id = $1
            ORDER BY last_updated DESC
            LIMIT 1
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(market_id, token_id, price, bid, ask, spread, volume, last_updated)| RealtimePrice {
                market_id,
                token_id: if token_id.is_empty() { None } else { Some(token_id) },
                price,
                bid,
                ask,
                spread,
                volume,
                last_updated,
            },
        ))
    }

    async fn cache_get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row: Option<(String, Value, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT key, value, expires_at, updated_at FROM cache WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(key, value, expires_at, updated_at)| CacheEntry {
            key,
            value,
            expires_at,
            updated_at,
        }))
    }

    async fn cache_put(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO cache (key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.expires_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_query_log(&self, entry: &QueryLogEntry) -> Result<(), StorageError> {
        let parsed_claim = serde_json::to_value(&entry.parsed_claim)?;
        sqlx::query(
            r#"
            INSERT INTO queries_log (id, question, parsed_claim, created_at,
                                     best_market_id, confidence, debug)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.question)
        .bind(parsed_claim)
        .bind(entry.created_at)
        .bind(&entry.best_market_id)
        .bind(entry.confidence)
        .bind(&entry.debug)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLogEntry>, StorageError> {
        type LogRow = (
            Uuid,
            String,
            Value,
            DateTime<Utc>,
            Option<String>,
            Option<f64>,
            Option<Value>,
        );
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"
            SELECT id, question, parsed_claim, created_at, best_market_id, confidence, debug
            FROM queries_log
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, question, parsed_claim, created_at, best_market_id, confidence, debug) in rows {
            entries.push(QueryLogEntry {
                id,
                question,
                parsed_claim: serde_json::from_value(parsed_claim)?,
                created_at,
                best_market_id,
                confidence,
                debug: debug.unwrap_or(Value::Null),
            });
        }
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
