use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use claimlens_core::config::ClaimlensConfig;
use claimlens_core::embeddings::{
    CachedEmbeddingBackend, EmbeddingBackend, EmbeddingConfig, FallbackEmbeddingClient,
};
use claimlens_core::parser::{
    ClaimParser, HeuristicClaimParser, OpenRouterClaimParser, ParserConfig,
};
use claimlens_core::polymarket::{
    CachedPriceSource, ClobClient, ClobConfig, GammaClient, GammaConfig, IngestionSource,
    PriceSource,
};
use claimlens_core::storage::{PgStorage, Storage};
use claimlens_ingest::backoff::BackoffPolicy;
use claimlens_ingest::pipeline::{bulk_ingest, BulkOptions};

use claimlens_server::http::{start_http_server, AppState};
use claimlens_server::scheduler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "claimlens.toml")]
    config: String,

    /// Check database connectivity and exit.
    #[arg(long)]
    health: bool,

    /// Run one bulk ingestion pass and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match ClaimlensConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match claimlens_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match claimlens_core::db::startup_check(&pool).await {
            Ok((server, vector)) => {
                println!("✅ PostgreSQL connected: {}", server);
                println!("✅ pgvector version: {}", vector);
                println!("✅ Claimlens DB health check passed");
            }
            Err(e) => {
                println!("❌ Database check failed: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let pg = PgStorage::new(pool);
    pg.migrate().await?;
    let storage: Arc<dyn Storage> = Arc::new(pg);

    // Embedding backend: OpenRouter wrapped in fallback (degrades to None
    // on failure) and a persistent cache layer.
    let mut embedding_config = EmbeddingConfig::new(
        None,
        config.embedding.model.clone(),
        config.embedding.dimensions,
    );
    embedding_config.max_retries = config.embedding.max_retries;
    embedding_config.retry_delay_ms = config.embedding.retry_delay_ms;
    let embeddings: Arc<dyn EmbeddingBackend> = Arc::new(CachedEmbeddingBackend::new(
        Box::new(FallbackEmbeddingClient::new(embedding_config)?),
        storage.clone(),
        config.embedding.cache_ttl_days as i64,
    ));

    // Claim parser: LLM when a key is configured, heuristics otherwise.
    let parser_config = ParserConfig::new(None, config.parser.model.clone());
    let parser: Arc<dyn ClaimParser> = match OpenRouterClaimParser::new(parser_config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::warn!("LLM parser unavailable ({}), using heuristic parser", e);
            Arc::new(HeuristicClaimParser)
        }
    };

    let markets: Arc<dyn IngestionSource> = Arc::new(GammaClient::new(GammaConfig {
        base_url: config.polymarket.gamma_base.clone(),
        timeout_secs: config.polymarket.gamma_timeout_secs,
        max_retries: config.polymarket.max_retries,
        retry_delay_ms: config.polymarket.retry_delay_ms,
    })?);

    let clob = ClobClient::new(ClobConfig {
        base_url: config.polymarket.clob_base.clone(),
        timeout_secs: config.polymarket.clob_timeout_secs,
        max_retries: config.polymarket.max_retries,
        retry_delay_ms: config.polymarket.retry_delay_ms,
    })?;
    let prices: Arc<dyn PriceSource> = Arc::new(CachedPriceSource::new(
        Box::new(clob),
        storage.clone(),
        config.polymarket.price_cache_ttl_secs as i64,
    ));

    let state = Arc::new(AppState {
        storage,
        parser,
        embeddings,
        prices,
        markets,
        config,
    });

    if args.once {
        let options = BulkOptions {
            batch_size: state.config.ingestion.batch_size as usize,
            max_batches: state.config.ingestion.max_batches as usize,
        };
        let report = bulk_ingest(
            state.storage.as_ref(),
            state.markets.as_ref(),
            state.embeddings.as_ref(),
            options,
            BackoffPolicy::bulk(),
        )
        .await;
        println!(
            "Ingest complete: {} processed, {} skipped, {} batches, {} errors",
            report.total_processed,
            report.total_skipped,
            report.batches,
            report.errors.len()
        );
        for err in &report.errors {
            eprintln!("  {}", err);
        }
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        let _ = shutdown_tx.send(());
    });

    tokio::spawn(scheduler::run_ingest_loop(state.clone(), tx.subscribe()));
    tokio::spawn(scheduler::run_cleanup_loop(state.clone(), tx.subscribe()));

    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
