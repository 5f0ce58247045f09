//! Claimlens HTTP REST API
//!
//! Axum-based HTTP server exposing claim resolution and market ingestion.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function. The inner functions are directly testable without
//! axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health   — health check with storage status
//! - GET  /version  — server version info
//! - POST /resolve  — resolve a factual question against markets
//! - POST /ingest   — pull one page of markets from the venue
//! - GET  /markets/popular — highest-volume markets with fused prices
//! - GET  /queries  — recent resolution history

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use claimlens_core::config::ClaimlensConfig;
use claimlens_core::embeddings::EmbeddingBackend;
use claimlens_core::parser::{ClaimParser, ParseError};
use claimlens_core::polymarket::{IngestionSource, PriceSource};
use claimlens_core::storage::Storage;
use claimlens_ingest::pipeline::ingest_page;
use claimlens_ingest::IngestError;

use crate::subsystems::prices::fuse_prices_batch;
use crate::subsystems::resolve::{resolve, ResolveError};

/// Shared state for all HTTP handlers
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub parser: Arc<dyn ClaimParser>,
    pub embeddings: Arc<dyn EmbeddingBackend>,
    pub prices: Arc<dyn PriceSource>,
    pub markets: Arc<dyn IngestionSource>,
    pub config: ClaimlensConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/resolve", post(resolve_handler))
        .route("/ingest", post(ingest_handler))
        .route("/markets/popular", get(popular_handler))
        .route("/queries", get(queries_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Claimlens HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub question: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct IngestParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct QueriesParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PopularParams {
    pub limit: Option<usize>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — pings storage and returns (status_code, json_body).
pub async fn health_inner(storage: &dyn Storage) -> (StatusCode, serde_json::Value) {
    match storage.ping().await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "claimlens",
    })
}

/// Inner resolve — validates the question and runs the resolution pipeline.
pub async fn resolve_inner(
    state: &AppState,
    req: ResolveRequest,
) -> (StatusCode, serde_json::Value) {
    let question = match req.question {
        Some(q) if !q.trim().is_empty() => q,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "question field is required",
                    "status": "error",
                }),
            );
        }
    };

    let start = Instant::now();
    let result = resolve(
        state.storage.as_ref(),
        state.parser.as_ref(),
        state.embeddings.as_ref(),
        state.prices.as_ref(),
        &state.config.resolver,
        &question,
        Utc::now(),
    )
    .await;
    let took_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(outcome) => {
            let mut body = serde_json::to_value(&outcome)
                .unwrap_or(serde_json::json!({}));
            if let Some(obj) = body.as_object_mut() {
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, body)
        }
        Err(ResolveError::Parse(ParseError::EmptyQuestion)) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "question field is required",
                "status": "error",
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": e.to_string(),
                "status": "error",
            }),
        ),
    }
}

/// Inner ingest — pulls one page of markets from the venue.
pub async fn ingest_inner(
    state: &AppState,
    params: IngestParams,
) -> (StatusCode, serde_json::Value) {
    let limit = params
        .limit
        .unwrap_or(state.config.ingestion.batch_size as usize);

    let result = ingest_page(
        state.storage.as_ref(),
        state.markets.as_ref(),
        state.embeddings.as_ref(),
        limit,
        params.cursor.as_deref(),
        Utc::now(),
    )
    .await;

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "processed": outcome.processed,
                "skipped": outcome.skipped,
                "skip_reasons": outcome.skip_reasons,
                "embedded": outcome.embedded,
                "next_cursor": outcome.next_cursor,
                "done": outcome.done,
            }),
        ),
        Err(e) => {
            let status = match &e {
                IngestError::Source(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                }),
            )
        }
    }
}

/// Inner popular markets — highest-volume open markets with fused prices.
pub async fn popular_inner(
    state: &AppState,
    params: PopularParams,
) -> (StatusCode, serde_json::Value) {
    let limit = params.limit.unwrap_or(10).min(50);
    let now = Utc::now();

    let mut markets = match state.storage.all_markets().await {
        Ok(m) => m,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": e.to_string(),
                    "status": "error",
                }),
            );
        }
    };
    markets.retain(|m| !m.has_ended(now));
    markets.sort_by(|a, b| {
        let av = a.volume.unwrap_or(f64::MIN);
        let bv = b.volume.unwrap_or(f64::MIN);
        bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
    });
    markets.truncate(limit);

    let quotes = fuse_prices_batch(
        state.storage.as_ref(),
        state.prices.as_ref(),
        &markets,
        &state.config.resolver,
        now,
    )
    .await;

    // quotes come back re-sorted; join market info back on by id
    let entries: Vec<serde_json::Value> = quotes
        .iter()
        .map(|quote| {
            let market = markets.iter().find(|m| m.market_id == quote.market_id);
            serde_json::json!({
                "market_id": quote.market_id,
                "title": market.map(|m| m.title.clone()),
                "url": market.and_then(|m| m.url.clone()),
                "outcomes": market.map(|m| m.outcomes.clone()),
                "end_date": market.and_then(|m| m.end_date),
                "price": quote,
            })
        })
        .collect();

    let count = entries.len();
    (
        StatusCode::OK,
        serde_json::json!({
            "markets": entries,
            "count": count,
        }),
    )
}

/// Inner queries — recent resolution history, newest first.
pub async fn queries_inner(
    storage: &dyn Storage,
    params: QueriesParams,
) -> (StatusCode, serde_json::Value) {
    let limit = params.limit.unwrap_or(20).min(100);
    match storage.recent_queries(limit).await {
        Ok(entries) => {
            let count = entries.len();
            (
                StatusCode::OK,
                serde_json::json!({
                    "queries": entries,
                    "count": count,
                }),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": e.to_string(),
                "status": "error",
            }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.storage.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    let (status, body) = resolve_inner(&state, req).await;
    (status, Json(body))
}

pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IngestParams>,
) -> impl IntoResponse {
    let (status, body) = ingest_inner(&state, params).await;
    (status, Json(body))
}

pub async fn popular_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PopularParams>,
) -> impl IntoResponse {
    let (status, body) = popular_inner(&state, params).await;
    (status, Json(body))
}

pub async fn queries_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueriesParams>,
) -> impl IntoResponse {
    let (status, body) = queries_inner(state.storage.as_ref(), params).await;
    (status, Json(body))
}
