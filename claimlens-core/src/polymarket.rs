//! Polymarket API clients.
//!
//! `GammaClient` pages through the Gamma catalog (`/markets`) and returns
//! raw market records; `normalize_market` turns those into domain `Market`s
//! or a `SkipReason`. `ClobClient` reads prices and order books from the
//! CLOB API; a 400 there means "unknown market" and maps to `Ok(None)`
//! without retrying, while 5xx responses are retried and eventually surface
//! as errors so callers can distinguish absence from failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::cache;
use crate::models::Market;
use crate::storage::{Storage, StorageError};
use crate::utils::coerce_f64;

pub const DEFAULT_GAMMA_BASE: &str = "https://gamma-api.polymarket.com";
pub const DEFAULT_CLOB_BASE: &str = "https://clob.polymarket.com";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Unexpected response format: {0}")]
    UnexpectedFormat(String),

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Cache error: {0}")]
    Cache(#[from] StorageError),
}

// ============================================================================
// Raw markets and normalization
// ============================================================================

/// A market record as the Gamma API serves it. Field shapes vary across
/// endpoints (numbers as strings, outcomes as a JSON-encoded string), so
/// everything stays loose until `normalize_market`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMarket {
    pub id: Option<Value>,
    pub market_id: Option<Value>,
    pub condition_id: Option<String>,
    pub question: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub resolution: Option<String>,
    pub slug: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "endDateISO", alias = "endDateIso")]
    pub end_date: Option<String>,
    pub outcomes: Option<Value>,
    pub volume: Option<Value>,
    pub volume_num: Option<f64>,
    pub liquidity: Option<Value>,
    pub liquidity_num: Option<f64>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
}

/// Why a raw market was not ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Closed,
    Ended,
    Inactive,
    MissingId,
    MissingTitle,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Closed => "closed",
            SkipReason::Ended => "ended",
            SkipReason::Inactive => "inactive",
            SkipReason::MissingId => "missing_id",
            SkipReason::MissingTitle => "missing_title",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn id_from_value(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_outcomes(raw: &Option<Value>) -> Vec<String> {
    match raw {
        // Gamma serializes outcomes as a JSON-encoded string, e.g. "[\"Yes\",\"No\"]"
        Some(Value::String(s)) => serde_json::from_str::<Vec<String>>(s)
            .unwrap_or_else(|_| vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec!["Yes".to_string(), "No".to_string()],
    }
}

/// Normalizes a raw Gamma record into a domain `Market`, or explains why
/// it is skipped. Validation order matters for skip accounting: closed,
/// then ended, then inactive, then identity checks.
pub fn normalize_market(raw: &RawMarket, now: DateTime<Utc>) -> Result<Market, SkipReason> {
    let end_date = raw.end_date.as_deref().and_then(parse_end_date);

    if raw.closed == Some(true) {
        return Err(SkipReason::Closed);
    }
    if matches!(end_date, Some(end) if end < now) {
        return Err(SkipReason::Ended);
    }
    if raw.active == Some(false) {
        return Err(SkipReason::Inactive);
    }

    let market_id = id_from_value(&raw.id)
        .or_else(|| id_from_value(&raw.market_id))
        .or_else(|| raw.condition_id.clone().filter(|s| !s.is_empty()))
        .or_else(|| raw.slug.clone().filter(|s| !s.is_empty()))
        .ok_or(SkipReason::MissingId)?;

    let title = raw
        .question
        .clone()
        .or_else(|| raw.title.clone())
        .or_else(|| raw.name.clone())
        .filter(|s| !s.is_empty())
        .ok_or(SkipReason::MissingTitle)?;

    let description = raw
        .description
        .clone()
        .or_else(|| raw.resolution.clone())
        .unwrap_or_default();

    let slug = raw.slug.clone().filter(|s| !s.is_empty());
    let url = raw
        .url
        .clone()
        .or_else(|| slug.as_ref().map(|s| format!("https://polymarket.com/event/{s}")));

    let volume = raw
        .volume_num
        .or_else(|| raw.volume.as_ref().and_then(coerce_f64));
    let liquidity = raw
        .liquidity_num
        .or_else(|| raw.liquidity.as_ref().and_then(coerce_f64));

    Ok(Market {
        market_id,
        title,
        description,
        slug,
        url,
        end_date,
        outcomes: parse_outcomes(&raw.outcomes),
        volume,
        liquidity,
        last_ingested_at: now,
    })
}

// ============================================================================
// Market pages and the ingestion source trait
// ============================================================================

/// One page of raw markets, plus the cursor to the next page if the
/// endpoint supplied one.
#[derive(Debug, Clone, Default)]
pub struct MarketPage {
    pub markets: Vec<RawMarket>,
    pub cursor: Option<String>,
}

impl MarketPage {
    /// Accepts the shapes the Gamma API has been observed to return: a bare
    /// array, `{data: [...], cursor}`, or an object with some other array
    /// field.
    pub fn from_response(data: Value) -> Result<Self, SourceError> {
        let (items, cursor) = match data {
            Value::Array(items) => (items, None),
            Value::Object(mut map) => {
                let cursor = map
                    .get("cursor")
                    .or_else(|| map.get("nextCursor"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let array_key = map
                    .iter()
                    .find(|(_, v)| v.is_array())
                    .map(|(k, _)| k.clone());
                match array_key {
                    Some(key) => match map.remove(&key) {
                        Some(Value::Array(items)) => (items, cursor),
                        _ => (Vec::new(), cursor),
                    },
                    None => {
                        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                        return Err(SourceError::UnexpectedFormat(format!(
                            "no market array in response, keys: {}",
                            keys.join(", ")
                        )));
                    }
                }
            }
            other => {
                return Err(SourceError::UnexpectedFormat(format!(
                    "expected array or object, got {other}"
                )))
            }
        };

        let markets = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawMarket>(item).ok())
            .collect();
        Ok(Self { markets, cursor })
    }
}

/// Paged source of raw markets.
#[async_trait]
pub trait IngestionSource: Send + Sync {
    async fn fetch_markets(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MarketPage, SourceError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// GammaClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GammaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GAMMA_BASE.to_string(),
            timeout_secs: 15,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Gamma catalog client. Only queries active, non-closed markets; the
/// normalizer re-checks both flags anyway since the API pre-filter has
/// been seen to leak edge cases.
#[derive(Debug, Clone)]
pub struct GammaClient {
    client: Client,
    config: GammaConfig,
}

impl GammaClient {
    pub fn new(config: GammaConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn with_base_url(base_url: String) -> Result<Self, SourceError> {
        Self::new(GammaConfig {
            base_url,
            retry_delay_ms: 10,
            ..GammaConfig::default()
        })
    }

    async fn fetch_once(&self, limit: usize, cursor: Option<&str>) -> Result<Value, SourceError> {
        let url = format!("{}/markets", self.config.base_url);
        let mut request = self.client.get(&url).query(&[
            ("limit", limit.to_string().as_str()),
            ("closed", "false"),
            ("active", "true"),
        ]);
        // the cursor is an opaque upstream token; .query percent-encodes it
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IngestionSource for GammaClient {
    async fn fetch_markets(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MarketPage, SourceError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let data = Retry::spawn(retry_strategy, || self.fetch_once(limit, cursor))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Gamma market fetch failed after retries");
                SourceError::RetryExhausted {
                    attempts: self.config.max_retries,
                }
            })?;

        MarketPage::from_response(data)
    }

    fn name(&self) -> &str {
        "gamma"
    }
}

// ============================================================================
// CLOB price source
// ============================================================================

/// Last-trade price from the CLOB `/price` endpoint; the price arrives as
/// a string.
#[derive(Debug, Clone, Deserialize)]
pub struct ClobPrice {
    #[serde(default, deserialize_with = "de_string_f64")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BookLevel {
    #[serde(deserialize_with = "de_string_f64")]
    pub price: Option<f64>,
    #[serde(deserialize_with = "de_string_f64")]
    pub size: Option<f64>,
}

/// Order book from the CLOB `/book` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids
            .iter()
            .filter_map(|l| l.price)
            .fold(None, |best, p| Some(best.map_or(p, |b: f64| b.max(p))))
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks
            .iter()
            .filter_map(|l| l.price)
            .fold(None, |best, p| Some(best.map_or(p, |b: f64| b.min(p))))
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

fn de_string_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_f64(&value))
}

/// REST price reads. `Ok(None)` means the market is unknown to the venue;
/// `Err` means the venue could not be reached.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, market_id: &str) -> Result<Option<ClobPrice>, SourceError>;

    async fn fetch_book(&self, market_id: &str) -> Result<Option<OrderBook>, SourceError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ClobConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CLOB_BASE.to_string(),
            timeout_secs: 5,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClobClient {
    client: Client,
    config: ClobConfig,
}

impl ClobClient {
    pub fn new(config: ClobConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn with_base_url(base_url: String) -> Result<Self, SourceError> {
        Self::new(ClobConfig {
            base_url,
            retry_delay_ms: 10,
            ..ClobConfig::default()
        })
    }

    /// Shared fetch for `/price` and `/book`. 400 is a terminal "unknown
    /// market" answer; anything else non-success is retried.
    async fn fetch_json(&self, path: &str, market_id: &str) -> Result<Option<Value>, SourceError> {
        let url = format!("{}/{path}?market={market_id}", self.config.base_url);

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || async {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if status.as_u16() == 400 {
                tracing::debug!(market_id, path, "market unknown to CLOB (400)");
                return Ok(None);
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(SourceError::Api {
                    code: status.as_u16(),
                    message,
                });
            }
            Ok(Some(response.json::<Value>().await?))
        })
        .await;

        result.map_err(|e| {
            tracing::warn!(market_id, path, error = %e, "CLOB fetch failed after retries");
            SourceError::RetryExhausted {
                attempts: self.config.max_retries,
            }
        })
    }
}

#[async_trait]
impl PriceSource for ClobClient {
    async fn fetch_price(&self, market_id: &str) -> Result<Option<ClobPrice>, SourceError> {
        match self.fetch_json("price", market_id).await? {
            Some(data) => Ok(serde_json::from_value(data).ok()),
            None => Ok(None),
        }
    }

    async fn fetch_book(&self, market_id: &str) -> Result<Option<OrderBook>, SourceError> {
        match self.fetch_json("book", market_id).await? {
            Some(data) => Ok(serde_json::from_value(data).ok()),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "clob"
    }
}

// ============================================================================
// CachedPriceSource
// ============================================================================

/// Wraps a `PriceSource` with a short storage-backed TTL so repeated
/// resolutions of the same market within the window reuse one venue call.
/// Only successful answers are cached; errors always retry the venue.
pub struct CachedPriceSource {
    inner: Box<dyn PriceSource>,
    storage: Arc<dyn Storage>,
    ttl: chrono::Duration,
}

impl CachedPriceSource {
    pub fn new(inner: Box<dyn PriceSource>, storage: Arc<dyn Storage>, ttl_secs: i64) -> Self {
        Self {
            inner,
            storage,
            ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    async fn get_cached(&self, key: &str) -> Result<Option<Value>, SourceError> {
        Ok(cache::get_fresh(self.storage.as_ref(), key, Utc::now()).await?)
    }

    async fn put_cached(&self, key: &str, value: Value) -> Result<(), SourceError> {
        cache::put(self.storage.as_ref(), key, value, self.ttl, Utc::now()).await?;
        Ok(())
    }
}

#[async_trait]
impl PriceSource for CachedPriceSource {
    async fn fetch_price(&self, market_id: &str) -> Result<Option<ClobPrice>, SourceError> {
        let key = format!("clob:price:{market_id}");
        if let Some(value) = self.get_cached(&key).await? {
            return Ok(serde_json::from_value(value).ok());
        }
        match self.inner.fetch_price(market_id).await? {
            Some(price) => {
                let value = serde_json::json!({
                    "price": price.price,
                });
                self.put_cached(&key, value).await?;
                Ok(Some(price))
            }
            None => Ok(None),
        }
    }

    async fn fetch_book(&self, market_id: &str) -> Result<Option<OrderBook>, SourceError> {
        let key = format!("clob:book:{market_id}");
        if let Some(value) = self.get_cached(&key).await? {
            return Ok(serde_json::from_value(value).ok());
        }
        match self.inner.fetch_book(market_id).await? {
            Some(book) => {
                let value = serde_json::json!({
                    "bids": book.bids.iter().map(|l| serde_json::json!({"price": l.price, "size": l.size})).collect::<Vec<_>>(),
                    "asks": book.asks.iter().map(|l| serde_json::json!({"price": l.price, "size": l.size})).collect::<Vec<_>>(),
                });
                self.put_cached(&key, value).await?;
                Ok(Some(book))
            }
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "cached-clob"
    }
}

// ============================================================================
// TESTS
// ============================================================================
