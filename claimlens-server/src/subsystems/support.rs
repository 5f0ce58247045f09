//! Test doubles shared by the subsystem tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use claimlens_core::embeddings::{EmbeddingBackend, EmbeddingError};
use claimlens_core::models::Market;
use claimlens_core::polymarket::{ClobPrice, OrderBook, PriceSource, SourceError};

/// A market ending a year out, safe from the ended-market filter.
pub fn seeded_market(market_id: &str, volume: f64) -> Market {
    Market {
        market_id: market_id.to_string(),
        title: format!("Market {market_id}"),
        description: String::new(),
        slug: Some(market_id.to_string()),
        url: Some(format!("https://polymarket.com/event/{market_id}")),
        end_date: Some(Utc::now() + Duration::days(365)),
        outcomes: vec!["Yes".to_string(), "No".to_string()],
        volume: Some(volume),
        liquidity: None,
        last_ingested_at: Utc::now(),
    }
}

/// Scripted REST price source that counts `/price` calls.
pub struct StubPrices {
    price: Option<f64>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StubPrices {
    pub fn with_price(price: f64) -> Self {
        Self {
            price: Some(price),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self {
            price: None,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            price: None,
            fail: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn price_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for StubPrices {
    async fn fetch_price(&self, _market_id: &str) -> Result<Option<ClobPrice>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::RetryExhausted { attempts: 3 });
        }
        Ok(self.price.map(|p| ClobPrice { price: Some(p) }))
    }

    async fn fetch_book(&self, _market_id: &str) -> Result<Option<OrderBook>, SourceError> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Embedding backend that answers from a fixed lookup table keyed on the
/// exact input text, so tests control similarity geometry directly.
pub struct TableBackend {
    entries: Vec<(String, Vec<f32>)>,
    default: Option<Vec<f32>>,
    fail: bool,
}

impl TableBackend {
    pub fn new(entries: Vec<(&str, Vec<f32>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            default: None,
            fail: false,
        }
    }

    pub fn with_default(mut self, vector: Vec<f32>) -> Self {
        self.default = Some(vector);
        self
    }

    pub fn failing() -> Self {
        Self {
            entries: Vec::new(),
            default: None,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for TableBackend {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::RetryExhausted { attempts: 3 });
        }
        let hit = self
            .entries
            .iter()
            .find(|(k, _)| text.contains(k.as_str()))
            .map(|(_, v)| v.clone());
        Ok(hit.or_else(|| self.default.clone()))
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn model(&self) -> &str {
        "test-model"
    }

    fn name(&self) -> &str {
        "table"
    }
}
