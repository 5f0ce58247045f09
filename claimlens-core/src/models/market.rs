use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::claim::ParsedClaim;

/// A prediction market as stored in the corpus.
///
/// `market_id` is the external Polymarket id and the only upsert key;
/// rows are created/updated by the ingestion pipeline and deleted only
/// by the cleanup sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub title: String,
    pub description: String,
    pub slug: Option<String>,
    pub url: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub outcomes: Vec<String>,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub last_ingested_at: DateTime<Utc>,
}

impl Market {
    /// True once the market's end date has passed.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        matches!(self.end_date, Some(end) if end <= now)
    }
}

/// One embedding row per market per active model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub market_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// Realtime price pushed by the streaming feed, keyed by (market, token).
/// Most-recent-wins; superseded, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimePrice {
    pub market_id: String,
    pub token_id: Option<String>,
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread: Option<f64>,
    pub volume: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

/// TTL cache row. Expiry is advisory: readers decide whether a stale entry
/// is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one resolver call, match or no-match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: Uuid,
    pub question: String,
    pub parsed_claim: ParsedClaim,
    pub created_at: DateTime<Utc>,
    pub best_market_id: Option<String>,
    pub confidence: Option<f64>,
    pub debug: serde_json::Value,
}
