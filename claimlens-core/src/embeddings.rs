//! Embeddings module — OpenRouter-backed embedding support
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **OpenRouter** — cloud embeddings via the OpenRouter API (1536-dim)
//! - **Fallback** — OpenRouter with graceful degradation to `Ok(None)`
//! - **Cached** — any backend wrapped with a storage-backed TTL cache

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::cache;
use crate::storage::{Storage, StorageError};
use crate::utils::hash_string;

/// Default OpenRouter embedding dimensions (`openai/text-embedding-3-small`).
pub const OPENROUTER_DIMENSIONS: usize = 1536;

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text. Returns `None` if embedding is unavailable
    /// (used in fallback mode to signal graceful degradation).
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError>;

    /// Embed a search query. Defaults to calling `embed()`; backends that
    /// distinguish query and document embeddings can override this.
    async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.embed(text).await
    }

    /// Returns the embedding dimension (e.g., 1536).
    fn dimensions(&self) -> usize;

    /// Model identifier; embeddings from different models never mix.
    fn model(&self) -> &str;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing embedding in response")]
    MissingEmbedding,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Cache error: {0}")]
    Cache(#[from] StorageError),
}

// ============================================================================
// Config types
// ============================================================================

/// OpenRouter embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl EmbeddingConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Cache key for an embedding of `text` under `model`. The hash covers both
/// so a model switch never serves vectors from the old model.
pub fn embedding_cache_key(text: &str, model: &str) -> String {
    format!("embed:{}", hash_string(&format!("{text}{model}")))
}

// ============================================================================
// OpenRouter API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    data: Vec<OpenRouterEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterEmbedding {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterErrorResponse {
    error: Option<OpenRouterErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterErrorDetail {
    code: Option<u16>,
    message: String,
}

// ============================================================================
// OpenRouterEmbeddingClient
// ============================================================================

/// OpenRouter embedding client — calls the OpenRouter embeddings endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouterEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl OpenRouterEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, "https://openrouter.ai/api/v1".to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: EmbeddingConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Generate an embedding for the given text (direct call, returns raw Vec)
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.embed_once(text)).await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenRouterRequest {
            model: self.config.model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<OpenRouterErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code.unwrap_or(status.as_u16()), e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "OpenRouter embeddings API error");

            return Err(EmbeddingError::Api { code, message });
        }

        let parsed: OpenRouterResponse = response.json().await?;

        let values = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::MissingEmbedding)?;

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for OpenRouterEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.embed_raw(text).await.map(Some)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

// ============================================================================
// FallbackEmbeddingClient
// ============================================================================

/// Wraps `OpenRouterEmbeddingClient`. On any error, logs a warning and
/// returns `Ok(None)` so the market is stored without an embedding vector
/// and a later re-embed pass can pick it up.
pub struct FallbackEmbeddingClient {
    inner: OpenRouterEmbeddingClient,
}

impl FallbackEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            inner: OpenRouterEmbeddingClient::new(config)?,
        })
    }

    #[cfg(test)]
    pub fn with_base_url(config: EmbeddingConfig, base_url: String) -> Result<Self, EmbeddingError> {
        Ok(Self {
            inner: OpenRouterEmbeddingClient::with_base_url(config, base_url)?,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for FallbackEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        match self.inner.embed_raw(text).await {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Embedding failed — market will be stored without a vector"
                );
                Ok(None)
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn name(&self) -> &str {
        "openrouter-fallback"
    }
}

// ============================================================================
// CachedEmbeddingBackend
// ============================================================================

/// Wraps any backend with a storage-backed TTL cache keyed on text + model.
/// Identical texts embed once per TTL window.
pub struct CachedEmbeddingBackend {
    inner: Box<dyn EmbeddingBackend>,
    storage: Arc<dyn Storage>,
    ttl: ChronoDuration,
}

impl CachedEmbeddingBackend {
    pub fn new(inner: Box<dyn EmbeddingBackend>, storage: Arc<dyn Storage>, ttl_days: i64) -> Self {
        Self {
            inner,
            storage,
            ttl: ChronoDuration::days(ttl_days),
        }
    }

    async fn cached_vector(&self, key: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        let value = match cache::get_fresh(self.storage.as_ref(), key, Utc::now()).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        // A malformed or wrong-dimension cached value is treated as a miss.
        match serde_json::from_value::<Vec<f32>>(value) {
            Ok(v) if v.len() == self.inner.dimensions() => Ok(Some(v)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for CachedEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        let key = embedding_cache_key(text, self.inner.model());

        if let Some(vector) = self.cached_vector(&key).await? {
            tracing::debug!(key = %key, "embedding cache hit");
            return Ok(Some(vector));
        }

        let vector = self.inner.embed(text).await?;
        if let Some(ref v) = vector {
            let value = serde_json::to_value(v).map_err(StorageError::from)?;
            cache::put(self.storage.as_ref(), &key, value, self.ttl, Utc::now()).await?;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn name(&self) -> &str {
        "cached"
    }
}

// ============================================================================
// TESTS
// ============================================================================
