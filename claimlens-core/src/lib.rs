pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod models;
pub mod parser;
pub mod polymarket;
pub mod storage;
pub mod utils;

pub use config::ClaimlensConfig;
pub use embeddings::{
    CachedEmbeddingBackend, EmbeddingBackend, EmbeddingConfig, EmbeddingError,
    FallbackEmbeddingClient, OpenRouterEmbeddingClient, DEFAULT_EMBEDDING_MODEL,
    OPENROUTER_DIMENSIONS,
};
pub use parser::{heuristic_parse, ClaimParser, HeuristicClaimParser, OpenRouterClaimParser};
pub use polymarket::{
    normalize_market, ClobClient, GammaClient, IngestionSource, MarketPage, PriceSource,
    RawMarket, SkipReason, SourceError,
};
pub use storage::{MemoryStorage, PgStorage, Storage, StorageError};
