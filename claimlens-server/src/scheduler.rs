//! Background schedulers.
//!
//! Two loops run alongside the HTTP server: a periodic bulk ingestion pull
//! from the venue, and a cleanup sweep that removes expired and abandoned
//! markets. Both honor the broadcast shutdown signal.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use claimlens_ingest::backoff::BackoffPolicy;
use claimlens_ingest::cleanup::{run_cleanup, CleanupOptions};
use claimlens_ingest::pipeline::{bulk_ingest, reembed_missing, BulkOptions};

use crate::http::AppState;

/// Periodic bulk ingestion. Ticks every `ingestion.interval_hours`.
pub async fn run_ingest_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let hours = state.config.ingestion.interval_hours;
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(hours * 3600));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick fires immediately; skip it so startup stays quiet
    ticker.tick().await;

    tracing::info!("Ingest loop started (interval: {}h)", hours);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let options = BulkOptions {
                    batch_size: state.config.ingestion.batch_size as usize,
                    max_batches: state.config.ingestion.max_batches as usize,
                };
                let policy = BackoffPolicy::bulk();
                let report = bulk_ingest(
                    state.storage.as_ref(),
                    state.markets.as_ref(),
                    state.embeddings.as_ref(),
                    options,
                    policy,
                )
                .await;
                tracing::info!(
                    "Scheduled ingest complete: {} processed, {} skipped, {} batches, {} errors",
                    report.total_processed,
                    report.total_skipped,
                    report.batches,
                    report.errors.len()
                );

                // Backfill vectors for markets whose embedding failed or
                // predates a model switch.
                match reembed_missing(
                    state.storage.as_ref(),
                    state.embeddings.as_ref(),
                    state.config.ingestion.batch_size as usize,
                    Utc::now(),
                )
                .await
                {
                    Ok((embedded, skipped)) if embedded > 0 || skipped > 0 => {
                        tracing::info!("Re-embed backfill: {} embedded, {} skipped", embedded, skipped);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Re-embed backfill error: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Ingest loop shutting down");
                break;
            }
        }
    }
}

/// Periodic cleanup sweep. Ticks every `cleanup.interval_hours`.
pub async fn run_cleanup_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let cleanup = &state.config.cleanup;
    if !cleanup.enabled {
        tracing::info!("Cleanup loop disabled by config");
        return;
    }

    let mut ticker =
        tokio::time::interval(tokio::time::Duration::from_secs(cleanup.interval_hours * 3600));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    tracing::info!("Cleanup loop started (interval: {}h)", cleanup.interval_hours);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let options = CleanupOptions {
                    delete_expired: cleanup.delete_expired,
                    retention_days: cleanup.retention_days,
                    dry_run: false,
                };
                match run_cleanup(state.storage.as_ref(), options, Utc::now()).await {
                    Ok(report) => tracing::info!(
                        "Cleanup complete: {} candidates, {} deleted, {} errors",
                        report.candidates,
                        report.deleted,
                        report.errors
                    ),
                    Err(e) => tracing::error!("Cleanup error: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Cleanup loop shutting down");
                break;
            }
        }
    }
}
