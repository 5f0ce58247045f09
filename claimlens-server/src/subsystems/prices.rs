//! Price fusion.
//!
//! A quote is assembled from the best available source: a fresh realtime
//! row from storage wins, otherwise the CLOB REST API is pulled, and a
//! REST failure is reported as `Error` rather than propagated. Fusion
//! itself never fails, so batch fusion over many markets cannot be sunk
//! by one bad venue call.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;

use claimlens_core::config::ResolverSettings;
use claimlens_core::models::{Market, PriceQuote, PriceSourceTag};
use claimlens_core::polymarket::PriceSource;
use claimlens_core::storage::Storage;

/// Best-available quote for one market.
pub async fn fuse_price(
    storage: &dyn Storage,
    prices: &dyn PriceSource,
    market: &Market,
    settings: &ResolverSettings,
    now: DateTime<Utc>,
) -> PriceQuote {
    let staleness = Duration::seconds(settings.realtime_staleness_secs);

    match storage.latest_realtime_price(&market.market_id).await {
        Ok(Some(rt)) if rt.price.is_some() && rt.last_updated > now - staleness => {
            return PriceQuote {
                market_id: market.market_id.clone(),
                price: rt.price,
                bid: rt.bid,
                ask: rt.ask,
                spread: rt.spread,
                volume: rt.volume.or(market.volume),
                source: PriceSourceTag::Realtime,
                updated_at: Some(rt.last_updated),
            };
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(market_id = %market.market_id, error = %e, "realtime price read failed, falling back to REST");
        }
    }

    match prices.fetch_price(&market.market_id).await {
        Ok(Some(clob)) if clob.price.is_some() => {
            // The book carries bid/ask depth the /price endpoint lacks;
            // losing it is fine, the quote still counts as priced.
            let book = prices.fetch_book(&market.market_id).await.ok().flatten();
            PriceQuote {
                market_id: market.market_id.clone(),
                price: clob.price,
                bid: book.as_ref().and_then(|b| b.best_bid()),
                ask: book.as_ref().and_then(|b| b.best_ask()),
                spread: book.as_ref().and_then(|b| b.spread()),
                volume: market.volume,
                source: PriceSourceTag::RestApi,
                updated_at: Some(now),
            }
        }
        Ok(_) => PriceQuote {
            volume: market.volume,
            ..PriceQuote::unavailable(&market.market_id, PriceSourceTag::None)
        },
        Err(e) => {
            tracing::warn!(market_id = %market.market_id, error = %e, "REST price fetch failed");
            PriceQuote {
                volume: market.volume,
                ..PriceQuote::unavailable(&market.market_id, PriceSourceTag::Error)
            }
        }
    }
}

/// Fuses quotes for many markets concurrently and sorts the result:
/// priced markets first, then by volume descending.
pub async fn fuse_prices_batch(
    storage: &dyn Storage,
    prices: &dyn PriceSource,
    markets: &[Market],
    settings: &ResolverSettings,
    now: DateTime<Utc>,
) -> Vec<PriceQuote> {
    let mut quotes = join_all(
        markets
            .iter()
            .map(|market| fuse_price(storage, prices, market, settings, now)),
    )
    .await;

    quotes.sort_by(|a, b| {
        b.source
            .has_price()
            .cmp(&a.source.has_price())
            .then_with(|| {
                let av = a.volume.unwrap_or(f64::MIN);
                let bv = b.volume.unwrap_or(f64::MIN);
                bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    quotes
}
