//! In-memory `Storage` backend.
//!
//! The test double for every component that reads or writes the corpus.
//! Semantics mirror `PgStorage`: keyed upserts, cascade delete of the
//! embedding with its market, most-recent-wins realtime prices.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::{CacheEntry, Embedding, Market, QueryLogEntry, RealtimePrice};

use super::{Storage, StorageError};

#[derive(Default)]
struct Inner {
    markets: HashMap<String, Market>,
    embeddings: HashMap<String, Embedding>,
    prices: HashMap<(String, String), RealtimePrice>,
    cache: HashMap<String, CacheEntry>,
    query_log: Vec<QueryLogEntry>,
    failing_deletes: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `delete_market` fail for this id. Lets tests exercise the
    /// per-item error accounting of bulk sweeps.
    pub fn inject_delete_failure(&self, market_id: &str) {
        self.inner
            .lock()
            .expect("memory storage poisoned")
            .failing_deletes
            .insert(market_id.to_string());
    }

    pub fn query_log_len(&self) -> usize {
        self.inner.lock().expect("memory storage poisoned").query_log.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.inner.lock().expect("memory storage poisoned").embeddings.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory storage poisoned")
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upsert_market(&self, market: &Market) -> Result<(), StorageError> {
        self.lock().markets.insert(market.market_id.clone(), market.clone());
        Ok(())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>, StorageError> {
        Ok(self.lock().markets.get(market_id).cloned())
    }

    async fn all_markets(&self) -> Result<Vec<Market>, StorageError> {
        let mut markets: Vec<Market> = self.lock().markets.values().cloned().collect();
        markets.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        Ok(markets)
    }

    async fn market_count(&self) -> Result<u64, StorageError> {
        Ok(self.lock().markets.len() as u64)
    }

    async fn delete_market(&self, market_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.failing_deletes.contains(market_id) {
            return Err(StorageError::WriteRejected(format!(
                "injected delete failure for {market_id}"
            )));
        }
        inner.markets.remove(market_id);
        inner.embeddings.remove(market_id);
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StorageError> {
        self.lock()
            .embeddings
            .insert(embedding.market_id.clone(), embedding.clone());
        Ok(())
    }

    async fn get_embedding(&self, market_id: &str) -> Result<Option<Embedding>, StorageError> {
        Ok(self.lock().embeddings.get(market_id).cloned())
    }

    async fn all_embeddings(&self, model: &str) -> Result<Vec<Embedding>, StorageError> {
        let mut rows: Vec<Embedding> = self
            .lock()
            .embeddings
            .values()
            .filter(|e| e.model == model)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        Ok(rows)
    }

    async fn markets_missing_embedding(
        &self,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Market>, StorageError> {
        let inner = self.lock();
        let mut missing: Vec<Market> = inner
            .markets
            .values()
            .filter(|m| {
                inner
                    .embeddings
                    .get(&m.market_id)
                    .map_or(true, |e| e.model != model)
            })
            .cloned()
            .collect();
        missing.sort_by_key(|m| m.last_ingested_at);
        missing.truncate(limit);
        Ok(missing)
    }

    async fn upsert_realtime_price(&self, price: &RealtimePrice) -> Result<(), StorageError> {
        let key = (
            price.market_id.clone(),
            price.token_id.clone().unwrap_or_default(),
        );
        self.lock().prices.insert(key, price.clone());
        Ok(())
    }

    async fn latest_realtime_price(
        &self,
        market_id: &str,
    ) -> Result<Option<RealtimePrice>, StorageError> {
        Ok(self
            .lock()
            .prices
            .values()
            .filter(|p| p.market_id == market_id)
            .max_by_key(|p| p.last_updated)
            .cloned())
    }

    async fn cache_get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.lock().cache.get(key).cloned())
    }

    async fn cache_put(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        self.lock().cache.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn append_query_log(&self, entry: &QueryLogEntry) -> Result<(), StorageError> {
        self.lock().query_log.push(entry.clone());
        Ok(())
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLogEntry>, StorageError> {
        let inner = self.lock();
        let mut rows = inner.query_log.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn market(id: &str) -> Market {
        Market {
            market_id: id.to_string(),
            title: format!("market {id}"),
            description: String::new(),
            slug: None,
            url: None,
            end_date: None,
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            volume: Some(100.0),
            liquidity: None,
            last_ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_market_is_idempotent_with_later_timestamp() {
        let store = MemoryStorage::new();
        let mut m = market("m1");
        store.upsert_market(&m).await.unwrap();

        m.last_ingested_at = m.last_ingested_at + Duration::seconds(30);
        store.upsert_market(&m).await.unwrap();

        assert_eq!(store.market_count().await.unwrap(), 1);
        let stored = store.get_market("m1").await.unwrap().unwrap();
        assert_eq!(stored.last_ingested_at, m.last_ingested_at);
    }

    #[tokio::test]
    async fn delete_market_cascades_embedding() {
        let store = MemoryStorage::new();
        store.upsert_market(&market("m1")).await.unwrap();
        store
            .upsert_embedding(&Embedding {
                market_id: "m1".to_string(),
                vector: vec![0.1, 0.2],
                model: "test-model".to_string(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        store.delete_market("m1").await.unwrap();

        assert!(store.get_market("m1").await.unwrap().is_none());
        assert!(store.get_embedding("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn all_embeddings_filters_by_model() {
        let store = MemoryStorage::new();
        for (id, model) in [("m1", "model-a"), ("m2", "model-b")] {
            store.upsert_market(&market(id)).await.unwrap();
            store
                .upsert_embedding(&Embedding {
                    market_id: id.to_string(),
                    vector: vec![1.0],
                    model: model.to_string(),
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let rows = store.all_embeddings("model-a").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_id, "m1");
    }

    #[tokio::test]
    async fn latest_realtime_price_prefers_most_recent() {
        let store = MemoryStorage::new();
        let now = Utc::now();
        for (token, age_secs, price) in [("t1", 60, 0.40), ("t2", 5, 0.62)] {
            store
                .upsert_realtime_price(&RealtimePrice {
                    market_id: "m1".to_string(),
                    token_id: Some(token.to_string()),
                    price: Some(price),
                    bid: None,
                    ask: None,
                    spread: None,
                    volume: None,
                    last_updated: now - Duration::seconds(age_secs),
                })
                .await
                .unwrap();
        }

        let latest = store.latest_realtime_price("m1").await.unwrap().unwrap();
        assert_eq!(latest.price, Some(0.62));
    }

    #[tokio::test]
    async fn query_log_is_append_only_and_ordered() {
        let store = MemoryStorage::new();
        let base = Utc::now();
        for i in 0..3 {
            store
                .append_query_log(&QueryLogEntry {
                    id: Uuid::new_v4(),
                    question: format!("q{i}"),
                    parsed_claim: crate::parser::heuristic_parse(&format!("q{i}")),
                    created_at: base + Duration::seconds(i),
                    best_market_id: None,
                    confidence: None,
                    debug: serde_json::json!({}),
                })
                .await
                .unwrap();
        }

        let recent = store.recent_queries(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "q2");
        assert_eq!(store.query_log_len(), 3);
    }
}
