//! Retention sweep over the market corpus.
//!
//! A market becomes a deletion candidate when it has expired (end date in
//! the past) or when ingestion has not touched it within the retention
//! window. Both reasons are reported when both apply. Dry runs never
//! write; per-market delete failures are counted and the sweep continues.

use chrono::{DateTime, Utc};

use claimlens_core::storage::Storage;

use crate::IngestError;

#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    /// Delete markets whose end date has passed.
    pub delete_expired: bool,
    /// Delete markets not re-ingested within this many days.
    pub retention_days: i64,
    /// Report candidates without deleting anything.
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            delete_expired: true,
            retention_days: 90,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanupCandidate {
    pub market_id: String,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub candidates: usize,
    pub deleted: usize,
    pub errors: usize,
    /// Sample of candidates for the operator, capped at ten.
    pub details: Vec<CleanupCandidate>,
}

const DETAIL_CAP: usize = 10;

pub async fn run_cleanup(
    storage: &dyn Storage,
    options: CleanupOptions,
    now: DateTime<Utc>,
) -> Result<CleanupReport, IngestError> {
    let markets = storage.all_markets().await?;
    tracing::info!(
        total = markets.len(),
        dry_run = options.dry_run,
        "starting cleanup sweep"
    );

    let mut candidates: Vec<CleanupCandidate> = Vec::new();
    for market in &markets {
        let mut reasons: Vec<String> = Vec::new();

        if options.delete_expired {
            if let Some(end) = market.end_date {
                if end < now {
                    reasons.push(format!("expired (ended {})", end.to_rfc3339()));
                }
            }
        }

        let days_stale = (now - market.last_ingested_at).num_days();
        if days_stale > options.retention_days {
            reasons.push(format!("not updated in {days_stale} days"));
        }

        if !reasons.is_empty() {
            candidates.push(CleanupCandidate {
                market_id: market.market_id.clone(),
                title: market.title.clone(),
                reason: reasons.join(", "),
            });
        }
    }

    let mut report = CleanupReport {
        dry_run: options.dry_run,
        scanned: markets.len(),
        candidates: candidates.len(),
        deleted: 0,
        errors: 0,
        details: candidates.iter().take(DETAIL_CAP).cloned().collect(),
    };

    if options.dry_run {
        tracing::info!(candidates = report.candidates, "dry run, nothing deleted");
        return Ok(report);
    }

    for candidate in &candidates {
        match storage.delete_market(&candidate.market_id).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                tracing::error!(market_id = %candidate.market_id, error = %e, "cleanup delete failed");
                report.errors += 1;
            }
        }
    }

    tracing::info!(
        deleted = report.deleted,
        errors = report.errors,
        "cleanup sweep complete"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use claimlens_core::models::{Embedding, Market};
    use claimlens_core::storage::MemoryStorage;

    fn market(id: &str, end_date: Option<DateTime<Utc>>, ingested: DateTime<Utc>) -> Market {
        Market {
            market_id: id.to_string(),
            title: format!("Market {id}"),
            description: String::new(),
            slug: None,
            url: None,
            end_date,
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            volume: None,
            liquidity: None,
            last_ingested_at: ingested,
        }
    }

    async fn seed(storage: &MemoryStorage, markets: Vec<Market>) {
        for m in markets {
            storage.upsert_market(&m).await.unwrap();
        }
    }

    #[tokio::test]
    async fn dry_run_reports_without_deleting() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        seed(
            &storage,
            vec![market("expired", Some(now - Duration::days(1)), now)],
        )
        .await;

        let report = run_cleanup(
            &storage,
            CleanupOptions {
                dry_run: true,
                ..CleanupOptions::default()
            },
            now,
        )
        .await
        .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(storage.market_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retention_window_boundary() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        seed(
            &storage,
            vec![
                market("stale", None, now - Duration::days(91)),
                market("fresh", None, now - Duration::days(89)),
            ],
        )
        .await;

        let report = run_cleanup(&storage, CleanupOptions::default(), now)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert!(storage.get_market("stale").await.unwrap().is_none());
        assert!(storage.get_market("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_and_stale_reasons_are_unioned() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        seed(
            &storage,
            vec![market(
                "both",
                Some(now - Duration::days(120)),
                now - Duration::days(120),
            )],
        )
        .await;

        let report = run_cleanup(
            &storage,
            CleanupOptions {
                dry_run: true,
                ..CleanupOptions::default()
            },
            now,
        )
        .await
        .unwrap();

        let detail = &report.details[0];
        assert!(detail.reason.contains("expired"));
        assert!(detail.reason.contains("not updated in"));
    }

    #[tokio::test]
    async fn disabling_delete_expired_keeps_expired_but_fresh_markets() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        seed(
            &storage,
            vec![market("expired", Some(now - Duration::days(1)), now)],
        )
        .await;

        let report = run_cleanup(
            &storage,
            CleanupOptions {
                delete_expired: false,
                ..CleanupOptions::default()
            },
            now,
        )
        .await
        .unwrap();

        assert_eq!(report.candidates, 0);
        assert_eq!(storage.market_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_a_market_cascades_to_its_embedding() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        seed(
            &storage,
            vec![market("expired", Some(now - Duration::days(1)), now)],
        )
        .await;
        storage
            .upsert_embedding(&Embedding {
                market_id: "expired".to_string(),
                vector: vec![0.1, 0.2],
                model: "test-model".to_string(),
                updated_at: now,
            })
            .await
            .unwrap();

        run_cleanup(&storage, CleanupOptions::default(), now)
            .await
            .unwrap();

        assert_eq!(storage.embedding_count(), 0);
    }

    #[tokio::test]
    async fn delete_failures_are_counted_and_do_not_abort() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        seed(
            &storage,
            vec![
                market("bad", Some(now - Duration::days(1)), now),
                market("good", Some(now - Duration::days(1)), now),
            ],
        )
        .await;
        storage.inject_delete_failure("bad");

        let report = run_cleanup(&storage, CleanupOptions::default(), now)
            .await
            .unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, 1);
        assert!(storage.get_market("good").await.unwrap().is_none());
    }
}
