//! Ingestion and retention pipelines over the market corpus.

pub mod backoff;
pub mod cleanup;
pub mod pipeline;

use thiserror::Error;

use claimlens_core::embeddings::EmbeddingError;
use claimlens_core::polymarket::SourceError;
use claimlens_core::storage::StorageError;

pub use backoff::BackoffPolicy;
pub use cleanup::{run_cleanup, CleanupOptions, CleanupReport};
pub use pipeline::{
    bulk_ingest, continuous_ingest, ingest_page, reembed_missing, BulkOptions, IngestReport,
    PageOutcome,
};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}
