//! Inter-batch pacing for the ingestion loops.

use std::time::Duration;

/// Delays applied between ingestion batches. Successful batches pace the
/// upstream API lightly; failed batches back off harder before the cursor
/// is retried.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub success_delay: Duration,
    pub failure_delay: Duration,
}

impl BackoffPolicy {
    /// Pacing for scheduled bulk runs.
    pub fn bulk() -> Self {
        Self {
            success_delay: Duration::from_millis(1000),
            failure_delay: Duration::from_millis(2000),
        }
    }

    /// Tighter pacing for continuous backfill runs.
    pub fn continuous() -> Self {
        Self {
            success_delay: Duration::from_millis(500),
            failure_delay: Duration::from_millis(5000),
        }
    }

    /// No delays, for tests.
    pub fn zero() -> Self {
        Self {
            success_delay: Duration::ZERO,
            failure_delay: Duration::ZERO,
        }
    }
}
