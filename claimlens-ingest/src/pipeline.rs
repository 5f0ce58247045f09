//! Market ingestion pipeline.
//!
//! `ingest_page` pulls one page from the source, normalizes each record,
//! upserts survivors and embeds the ones whose text changed. `bulk_ingest`
//! and `continuous_ingest` drive it in a cursor loop; a failed batch is
//! recorded and the loop moves on rather than aborting the run.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use claimlens_core::embeddings::EmbeddingBackend;
use claimlens_core::models::{Embedding, Market};
use claimlens_core::polymarket::IngestionSource;
use claimlens_core::storage::Storage;

use crate::backoff::BackoffPolicy;
use crate::IngestError;

/// Result of ingesting a single page.
#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub skip_reasons: BTreeMap<String, u64>,
    pub embedded: usize,
    pub next_cursor: Option<String>,
    pub done: bool,
}

/// Aggregate result of a multi-batch run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub total_processed: usize,
    pub total_skipped: usize,
    pub batches: usize,
    pub skip_reasons: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct BulkOptions {
    pub batch_size: usize,
    pub max_batches: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batches: 1000,
        }
    }
}

/// The text a market is embedded as: title, description, outcomes and the
/// end date when present. Changing any of these triggers a re-embed.
pub fn embedding_text(market: &Market) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4);
    parts.push(market.title.clone());
    parts.push(market.description.clone());
    parts.push(market.outcomes.join(", "));
    if let Some(end) = market.end_date {
        parts.push(end.to_rfc3339());
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

async fn needs_embedding(
    storage: &dyn Storage,
    market: &Market,
    model: &str,
) -> Result<bool, IngestError> {
    let existing_embedding = storage.get_embedding(&market.market_id).await?;
    let existing_market = storage.get_market(&market.market_id).await?;
    match (existing_embedding, existing_market) {
        (Some(embedding), Some(existing)) => Ok(embedding.model != model
            || existing.title != market.title
            || existing.description != market.description),
        _ => Ok(true),
    }
}

/// Ingests one page. Per-market embedding failures are tolerated: the
/// market is kept without a vector and a later `reembed_missing` pass
/// picks it up.
pub async fn ingest_page(
    storage: &dyn Storage,
    source: &dyn IngestionSource,
    backend: &dyn EmbeddingBackend,
    limit: usize,
    cursor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PageOutcome, IngestError> {
    let page = source.fetch_markets(limit, cursor).await?;
    let page_len = page.markets.len();

    let mut outcome = PageOutcome::default();

    for raw in &page.markets {
        let market = match claimlens_core::normalize_market(raw, now) {
            Ok(market) => market,
            Err(reason) => {
                *outcome
                    .skip_reasons
                    .entry(reason.as_str().to_string())
                    .or_insert(0) += 1;
                outcome.skipped += 1;
                continue;
            }
        };

        let embed = needs_embedding(storage, &market, backend.model()).await?;
        storage.upsert_market(&market).await?;
        outcome.processed += 1;

        if embed {
            let text = embedding_text(&market);
            match backend.embed(&text).await {
                Ok(Some(vector)) => {
                    storage
                        .upsert_embedding(&Embedding {
                            market_id: market.market_id.clone(),
                            vector,
                            model: backend.model().to_string(),
                            updated_at: now,
                        })
                        .await?;
                    outcome.embedded += 1;
                }
                Ok(None) => {
                    tracing::debug!(market_id = %market.market_id, "embedding unavailable, market kept without vector");
                }
                Err(e) => {
                    tracing::warn!(market_id = %market.market_id, error = %e, "embedding failed, market kept without vector");
                }
            }
        }
    }

    outcome.next_cursor = page.cursor;
    outcome.done = outcome.next_cursor.is_none() || page_len < limit;

    tracing::info!(
        processed = outcome.processed,
        skipped = outcome.skipped,
        embedded = outcome.embedded,
        done = outcome.done,
        "ingested page"
    );

    Ok(outcome)
}

fn merge_reasons(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (reason, count) in from {
        *into.entry(reason.clone()).or_insert(0) += count;
    }
}

/// Pages through the catalog until it is exhausted or `max_batches` is
/// reached. A batch error is recorded and the same cursor retried after
/// the failure delay; with no cursor yet, the run just ends.
pub async fn bulk_ingest(
    storage: &dyn Storage,
    source: &dyn IngestionSource,
    backend: &dyn EmbeddingBackend,
    options: BulkOptions,
    policy: BackoffPolicy,
) -> IngestReport {
    let started = Instant::now();
    let mut report = IngestReport::default();
    let mut cursor: Option<String> = None;
    let mut done = false;

    tracing::info!(
        max_batches = options.max_batches,
        batch_size = options.batch_size,
        "starting bulk ingestion"
    );

    while !done && report.batches < options.max_batches {
        match ingest_page(
            storage,
            source,
            backend,
            options.batch_size,
            cursor.as_deref(),
            Utc::now(),
        )
        .await
        {
            Ok(outcome) => {
                report.total_processed += outcome.processed;
                report.total_skipped += outcome.skipped;
                merge_reasons(&mut report.skip_reasons, &outcome.skip_reasons);
                report.batches += 1;
                done = outcome.done || outcome.processed < options.batch_size;
                cursor = outcome.next_cursor;

                if !done && cursor.is_some() {
                    tokio::time::sleep(policy.success_delay).await;
                }
            }
            Err(e) => {
                tracing::error!(batch = report.batches + 1, error = %e, "ingestion batch failed");
                report
                    .errors
                    .push(format!("Batch {}: {e}", report.batches + 1));
                if cursor.is_some() {
                    tokio::time::sleep(policy.failure_delay).await;
                } else {
                    done = true;
                }
            }
        }
    }

    report.duration = started.elapsed();
    tracing::info!(
        processed = report.total_processed,
        skipped = report.total_skipped,
        batches = report.batches,
        errors = report.errors.len(),
        "bulk ingestion complete"
    );
    report
}

/// Like `bulk_ingest` but bounded by wall clock instead of batch count,
/// for initial backfills.
pub async fn continuous_ingest(
    storage: &dyn Storage,
    source: &dyn IngestionSource,
    backend: &dyn EmbeddingBackend,
    batch_size: usize,
    max_duration: Duration,
    policy: BackoffPolicy,
) -> IngestReport {
    let started = Instant::now();
    let mut report = IngestReport::default();
    let mut cursor: Option<String> = None;
    let mut done = false;

    while !done && started.elapsed() < max_duration {
        match ingest_page(
            storage,
            source,
            backend,
            batch_size,
            cursor.as_deref(),
            Utc::now(),
        )
        .await
        {
            Ok(outcome) => {
                report.total_processed += outcome.processed;
                report.total_skipped += outcome.skipped;
                merge_reasons(&mut report.skip_reasons, &outcome.skip_reasons);
                report.batches += 1;
                done = outcome.done || outcome.processed < batch_size;
                cursor = outcome.next_cursor;

                if !done && cursor.is_some() {
                    tokio::time::sleep(policy.success_delay).await;
                }
            }
            Err(e) => {
                report
                    .errors
                    .push(format!("Batch {}: {e}", report.batches + 1));
                tokio::time::sleep(policy.failure_delay).await;
                if cursor.is_none() {
                    done = true;
                }
            }
        }
    }

    report.duration = started.elapsed();
    report
}

/// Embeds markets that have no vector for the backend's model, oldest
/// first. Returns `(embedded, skipped)`; a market is skipped when the
/// backend fails or declines, and a later pass picks it up again.
pub async fn reembed_missing(
    storage: &dyn Storage,
    backend: &dyn EmbeddingBackend,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<(usize, usize), IngestError> {
    let markets = storage
        .markets_missing_embedding(backend.model(), limit)
        .await?;
    let mut embedded = 0;
    let mut skipped = 0;

    for market in &markets {
        match backend.embed(&embedding_text(market)).await {
            Ok(Some(vector)) => {
                storage
                    .upsert_embedding(&Embedding {
                        market_id: market.market_id.clone(),
                        vector,
                        model: backend.model().to_string(),
                        updated_at: now,
                    })
                    .await?;
                embedded += 1;
            }
            Ok(None) => skipped += 1,
            Err(e) => {
                tracing::warn!(market_id = %market.market_id, error = %e, "re-embed failed");
                skipped += 1;
            }
        }
    }

    Ok((embedded, skipped))
}

// ============================================================================
// TESTS
// ============================================================================
