//! Claim resolution pipeline.
//!
//! A free-text question is parsed into a structured claim, embedded, and
//! ranked against every stored market embedding by cosine similarity. The
//! best candidate above the acceptance threshold is priced through fusion
//! and blended into a confidence score. Every resolution, match or not,
//! lands exactly one row in the query log with the ranked debug trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use claimlens_core::config::ResolverSettings;
use claimlens_core::embeddings::EmbeddingBackend;
use claimlens_core::models::{Market, ParsedClaim, PriceQuote, PriceSourceTag, QueryLogEntry};
use claimlens_core::parser::{ClaimParser, ParseError};
use claimlens_core::polymarket::PriceSource;
use claimlens_core::storage::{Storage, StorageError};
use claimlens_core::utils::{clamp01, cosine_similarity};

use crate::subsystems::prices::fuse_price;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One ranked candidate, recorded in the query-log debug trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub market_id: String,
    pub title: String,
    pub similarity: f64,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDebug {
    pub candidates: Vec<CandidateScore>,
    pub embedding_model: String,
    /// True when the query embedding was unavailable and no ranking ran.
    pub degraded: bool,
}

/// The accepted market, with its fused price attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedMarket {
    pub market_id: String,
    pub title: String,
    pub url: Option<String>,
    pub outcomes: Vec<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub similarity: f64,
    pub price: PriceQuote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub question: String,
    pub parsed_claim: ParsedClaim,
    pub matched: bool,
    pub best: Option<ResolvedMarket>,
    pub confidence: f64,
    pub summary: String,
    pub debug: ResolveDebug,
}

fn source_label(tag: PriceSourceTag) -> &'static str {
    match tag {
        PriceSourceTag::Realtime => "realtime feed",
        PriceSourceTag::RestApi => "REST API",
        PriceSourceTag::None => "no price data",
        PriceSourceTag::Error => "price fetch failed",
    }
}

fn price_tier(tag: PriceSourceTag, settings: &ResolverSettings) -> f64 {
    match tag {
        PriceSourceTag::Realtime => settings.realtime_tier,
        PriceSourceTag::RestApi => settings.rest_tier,
        PriceSourceTag::None | PriceSourceTag::Error => 0.0,
    }
}

/// Resolves a question end to end. Only parse and storage errors surface;
/// embedding and price failures degrade the outcome instead.
pub async fn resolve(
    storage: &dyn Storage,
    parser: &dyn ClaimParser,
    backend: &dyn EmbeddingBackend,
    prices: &dyn PriceSource,
    settings: &ResolverSettings,
    question: &str,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome, ResolveError> {
    let parsed = parser.parse(question).await?;

    let query_vector = match backend.embed_query(&parsed.retrieval_text()).await {
        Ok(Some(v)) => Some(v),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed, resolving without candidates");
            None
        }
    };

    let mut debug = ResolveDebug {
        candidates: Vec::new(),
        embedding_model: backend.model().to_string(),
        degraded: query_vector.is_none(),
    };

    let mut ranked: Vec<(Market, f64)> = Vec::new();
    if let Some(query) = &query_vector {
        for embedding in storage.all_embeddings(backend.model()).await? {
            if embedding.vector.len() != query.len() {
                tracing::warn!(
                    market_id = %embedding.market_id,
                    "stored embedding dimension mismatch, skipping"
                );
                continue;
            }
            let Some(market) = storage.get_market(&embedding.market_id).await? else {
                continue;
            };
            if market.has_ended(now) {
                continue;
            }
            let similarity = cosine_similarity(query, &embedding.vector);
            ranked.push((market, similarity));
        }
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let av = a.0.volume.unwrap_or(f64::MIN);
                    let bv = b.0.volume.unwrap_or(f64::MIN);
                    bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.0.last_ingested_at.cmp(&a.0.last_ingested_at))
        });
        debug.candidates = ranked
            .iter()
            .take(settings.debug_candidates)
            .map(|(m, s)| CandidateScore {
                market_id: m.market_id.clone(),
                title: m.title.clone(),
                similarity: *s,
                volume: m.volume,
            })
            .collect();
    }

    let accepted = ranked
        .into_iter()
        .next()
        .filter(|(_, similarity)| *similarity > settings.accept_threshold);

    let outcome = match accepted {
        Some((market, similarity)) => {
            let quote = fuse_price(storage, prices, &market, settings, now).await;
            let tier = price_tier(quote.source, settings);
            let confidence = clamp01(
                settings.similarity_weight * similarity + settings.price_weight * tier,
            );
            let summary = match quote.price {
                Some(price) => format!(
                    "Matched \"{}\" (similarity {:.2}). Yes is trading at {:.2} via {}.",
                    market.title,
                    similarity,
                    price,
                    source_label(quote.source)
                ),
                None => format!(
                    "Matched \"{}\" (similarity {:.2}), but {}.",
                    market.title,
                    similarity,
                    source_label(quote.source)
                ),
            };
            ResolveOutcome {
                question: question.to_string(),
                parsed_claim: parsed,
                matched: true,
                best: Some(ResolvedMarket {
                    market_id: market.market_id,
                    title: market.title,
                    url: market.url,
                    outcomes: market.outcomes,
                    end_date: market.end_date,
                    similarity,
                    price: quote,
                }),
                confidence,
                summary,
                debug,
            }
        }
        None => {
            let summary = if debug.degraded {
                "Embeddings are unavailable; no markets could be ranked.".to_string()
            } else {
                "No prediction market matched this claim closely enough.".to_string()
            };
            ResolveOutcome {
                question: question.to_string(),
                parsed_claim: parsed,
                matched: false,
                best: None,
                confidence: 0.0,
                summary,
                debug,
            }
        }
    };

    let entry = QueryLogEntry {
        id: Uuid::new_v4(),
        question: outcome.question.clone(),
        parsed_claim: outcome.parsed_claim.clone(),
        created_at: now,
        best_market_id: outcome.best.as_ref().map(|b| b.market_id.clone()),
        confidence: outcome.matched.then_some(outcome.confidence),
        debug: serde_json::to_value(&outcome.debug).unwrap_or(serde_json::Value::Null),
    };
    storage.append_query_log(&entry).await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::support::{seeded_market, StubPrices, TableBackend};
    use async_trait::async_trait;
    use chrono::Duration;
    use claimlens_core::models::{ClaimKind, Embedding, RealtimePrice, TimeWindow};
    use claimlens_core::parser::HeuristicClaimParser;
    use claimlens_core::storage::MemoryStorage;

    /// Parser double that returns a prepared claim regardless of input.
    struct FixedParser(ParsedClaim);

    #[async_trait]
    impl ClaimParser for FixedParser {
        async fn parse(&self, _question: &str) -> Result<ParsedClaim, ParseError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    async fn seed(storage: &MemoryStorage, market: Market, vector: Vec<f32>) {
        storage.upsert_market(&market).await.unwrap();
        storage
            .upsert_embedding(&Embedding {
                market_id: market.market_id.clone(),
                vector,
                model: "test-model".to_string(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn corpus_backend() -> TableBackend {
        TableBackend::new(vec![
            ("Fed", vec![1.0, 0.0, 0.0]),
            ("Bitcoin", vec![0.0, 1.0, 0.0]),
        ])
        .with_default(vec![0.0, 0.0, 1.0])
    }

    #[tokio::test]
    async fn picks_closest_market_and_blends_confidence() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("fed", 1000.0), vec![1.0, 0.0, 0.0]).await;
        seed(&storage, seeded_market("btc", 1000.0), vec![0.0, 1.0, 0.0]).await;
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(outcome.matched);
        let best = outcome.best.unwrap();
        assert_eq!(best.market_id, "fed");
        assert!((best.similarity - 1.0).abs() < 1e-9);
        // no price anywhere, so confidence is the similarity term alone
        assert!((outcome.confidence - 0.70).abs() < 1e-9);
        assert_eq!(best.price.source, PriceSourceTag::None);
        assert_eq!(storage.query_log_len(), 1);
    }

    #[tokio::test]
    async fn must_include_keywords_reach_the_query_embedding() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("fed", 1000.0), vec![1.0, 0.0, 0.0]).await;
        // the claim text alone never mentions the keyword; only the
        // parser's must_include anchor carries it
        let parser = FixedParser(ParsedClaim {
            claim: "Interest rates will be reduced".to_string(),
            kind: ClaimKind::FutureEvent,
            time_window: TimeWindow::default(),
            entities: vec![],
            must_include: vec!["Fed".to_string()],
            must_exclude: vec![],
            ambiguities: vec![],
        });
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &parser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will interest rates be reduced?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(outcome.matched);
        assert_eq!(outcome.best.unwrap().market_id, "fed");
    }

    #[tokio::test]
    async fn fresh_realtime_price_lifts_confidence_to_full() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("fed", 1000.0), vec![1.0, 0.0, 0.0]).await;
        storage
            .upsert_realtime_price(&RealtimePrice {
                market_id: "fed".to_string(),
                token_id: None,
                price: Some(0.70),
                bid: None,
                ask: None,
                spread: None,
                volume: None,
                last_updated: Utc::now(),
            })
            .await
            .unwrap();
        let prices = StubPrices::with_price(0.99);

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!((outcome.confidence - 1.0).abs() < 1e-9);
        let best = outcome.best.unwrap();
        assert_eq!(best.price.source, PriceSourceTag::Realtime);
        assert_eq!(best.price.price, Some(0.70));
        assert_eq!(prices.price_calls(), 0);
    }

    #[tokio::test]
    async fn failing_rest_degrades_price_but_keeps_match() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("fed", 1000.0), vec![1.0, 0.0, 0.0]).await;
        let prices = StubPrices::failing();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(outcome.matched);
        let best = outcome.best.unwrap();
        assert_eq!(best.price.source, PriceSourceTag::Error);
        assert!((outcome.confidence - 0.70).abs() < 1e-9);
    }

    #[tokio::test]
    async fn below_threshold_is_no_match_but_still_logged() {
        let storage = MemoryStorage::new();
        // orthogonal to every query vector the backend produces
        seed(&storage, seeded_market("other", 1000.0), vec![0.0, 1.0, 0.0]).await;
        let backend = TableBackend::new(vec![("Fed", vec![1.0, 0.0, 0.0])])
            .with_default(vec![1.0, 0.0, 0.0]);
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &backend,
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!outcome.matched);
        assert!(outcome.best.is_none());
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.debug.candidates.len(), 1);
        assert_eq!(storage.query_log_len(), 1);
    }

    #[tokio::test]
    async fn similarity_at_threshold_is_not_a_match() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("fed", 1000.0), vec![1.0, 0.0, 0.0]).await;
        let prices = StubPrices::empty();
        let settings = ResolverSettings {
            // identical vectors score exactly 1.0; the top candidate must
            // strictly exceed the threshold to count
            accept_threshold: 1.0,
            ..ResolverSettings::default()
        };

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &settings,
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!outcome.matched);
        assert!(outcome.best.is_none());
    }

    #[tokio::test]
    async fn empty_corpus_resolves_to_no_match() {
        let storage = MemoryStorage::new();
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!outcome.matched);
        assert!(outcome.debug.candidates.is_empty());
        assert!(!outcome.debug.degraded);
    }

    #[tokio::test]
    async fn mismatched_dimensions_and_ended_markets_are_skipped() {
        let storage = MemoryStorage::new();
        // wrong dimension
        seed(&storage, seeded_market("bad-dims", 1000.0), vec![1.0, 0.0]).await;
        // perfect match but already ended
        let mut ended = seeded_market("ended", 1000.0);
        ended.end_date = Some(Utc::now() - Duration::days(1));
        seed(&storage, ended, vec![1.0, 0.0, 0.0]).await;
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!outcome.matched);
        assert!(outcome.debug.candidates.is_empty());
    }

    #[tokio::test]
    async fn volume_breaks_similarity_ties() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("small", 100.0), vec![1.0, 0.0, 0.0]).await;
        seed(&storage, seeded_market("big", 9000.0), vec![1.0, 0.0, 0.0]).await;
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.best.unwrap().market_id, "big");
    }

    #[tokio::test]
    async fn embedding_failure_degrades_and_still_logs() {
        let storage = MemoryStorage::new();
        seed(&storage, seeded_market("fed", 1000.0), vec![1.0, 0.0, 0.0]).await;
        let prices = StubPrices::empty();

        let outcome = resolve(
            &storage,
            &HeuristicClaimParser,
            &TableBackend::failing(),
            &prices,
            &ResolverSettings::default(),
            "Will the Fed cut rates in 2026?",
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!outcome.matched);
        assert!(outcome.debug.degraded);
        assert_eq!(storage.query_log_len(), 1);
        let logged = storage.recent_queries(1).await.unwrap();
        assert_eq!(logged[0].best_market_id, None);
        assert_eq!(logged[0].confidence, None);
    }

    #[tokio::test]
    async fn empty_question_is_a_parse_error() {
        let storage = MemoryStorage::new();
        let prices = StubPrices::empty();

        let result = resolve(
            &storage,
            &HeuristicClaimParser,
            &corpus_backend(),
            &prices,
            &ResolverSettings::default(),
            "   ",
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(ResolveError::Parse(_))));
        assert_eq!(storage.query_log_len(), 0);
    }
}
