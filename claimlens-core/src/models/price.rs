use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a fused price came from. Ordered best-first: realtime push data
/// beats a REST pull beats nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceTag {
    Realtime,
    RestApi,
    /// The venue had no data for this market.
    None,
    /// The REST fetch itself failed.
    Error,
}

impl PriceSourceTag {
    pub fn has_price(self) -> bool {
        matches!(self, PriceSourceTag::Realtime | PriceSourceTag::RestApi)
    }
}

/// Best-available price for a market, as returned by price fusion.
/// All fields except `source` are nullable; callers degrade to
/// "price unavailable" instead of handling errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub market_id: String,
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread: Option<f64>,
    pub volume: Option<f64>,
    pub source: PriceSourceTag,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PriceQuote {
    pub fn unavailable(market_id: impl Into<String>, source: PriceSourceTag) -> Self {
        Self {
            market_id: market_id.into(),
            price: None,
            bid: None,
            ask: None,
            spread: None,
            volume: None,
            source,
            updated_at: None,
        }
    }
}
