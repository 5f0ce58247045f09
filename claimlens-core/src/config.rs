use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ClaimlensConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub parser: ParserSettings,
    #[serde(default)]
    pub polymarket: PolymarketSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSettings {
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Vectors are deterministic for a given text+model, so the cache is
    /// effectively permanent.
    pub cache_ttl_days: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "openai/text-embedding-3-small".to_string(),
            dimensions: 1536,
            max_retries: 3,
            retry_delay_ms: 1000,
            cache_ttl_days: 365,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserSettings {
    pub model: String,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolymarketSettings {
    pub gamma_base: String,
    pub clob_base: String,
    pub gamma_timeout_secs: u64,
    pub clob_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub price_cache_ttl_secs: u64,
}

impl Default for PolymarketSettings {
    fn default() -> Self {
        Self {
            gamma_base: "https://gamma-api.polymarket.com".to_string(),
            clob_base: "https://clob.polymarket.com".to_string(),
            gamma_timeout_secs: 15,
            clob_timeout_secs: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
            price_cache_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionSettings {
    pub batch_size: u32,
    pub max_batches: u32,
    pub interval_hours: u64,
    pub success_delay_ms: u64,
    pub failure_delay_ms: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batches: 1000,
            interval_hours: 6,
            success_delay_ms: 1000,
            failure_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupSettings {
    pub enabled: bool,
    pub delete_expired: bool,
    pub retention_days: i64,
    pub interval_hours: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_expired: true,
            retention_days: 90,
            interval_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverSettings {
    /// Top similarity must exceed this for a market to count as a match.
    pub accept_threshold: f64,
    /// Confidence = similarity_weight * similarity + price_weight * tier.
    pub similarity_weight: f64,
    pub price_weight: f64,
    pub realtime_tier: f64,
    pub rest_tier: f64,
    /// How many ranked candidates to record in the query-log debug trail.
    pub debug_candidates: usize,
    /// A realtime row older than this falls through to the REST pull.
    pub realtime_staleness_secs: i64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            accept_threshold: 0.55,
            similarity_weight: 0.70,
            price_weight: 0.30,
            realtime_tier: 1.0,
            rest_tier: 0.8,
            debug_candidates: 10,
            realtime_staleness_secs: 300,
        }
    }
}

impl ClaimlensConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name(path)).build()?;
        s.try_deserialize()
    }
}
