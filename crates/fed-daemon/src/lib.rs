// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HTTP Daemon (C10): the axum-based transport around the orchestrator.
//!
//! Routes are deliberately thin — validation happens before the orchestrator
//! is invoked, and the orchestrator's [`FederationResponse`] is returned
//! as-is. `GET /health` and `GET /sources` carry no federation semantics;
//! they exist because every daemon in this lineage exposes them.

pub mod middleware;
pub mod validation;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fed_catalog::SchemaCatalog;
use fed_orchestrator::{FederationResponse, Orchestrator};
use fed_registry::SourceRegistry;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use validation::RequestValidator;

/// Shared application state, cheap to clone (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<SourceRegistry>,
    pub catalog: Arc<SchemaCatalog>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub user_id: String,
    pub nl_query: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaSearchQuery {
    pub q: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

/// Structured API error, returned as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the axum router with all daemon routes and middleware.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/sources", get(cmd_sources))
        .route("/api/v1/query", post(cmd_query))
        .route("/api/v1/schema/search", get(cmd_schema_search))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(middleware::permissive_cors())
        .with_state(state)
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn cmd_sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources: Vec<serde_json::Value> = state
        .registry
        .all()
        .into_iter()
        .map(|m| json!({ "id": m.id, "host": m.host, "capabilities": m.capabilities }))
        .collect();
    Json(json!({ "sources": sources }))
}

async fn cmd_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<FederationResponse>, ApiError> {
    RequestValidator::validate_query_request(&req.user_id, &req.nl_query).map_err(|errors| ApiError::bad_request(errors.join("; ")))?;

    let response = state.orchestrator.handle(&req.user_id, &req.nl_query, &req.context).await;
    Ok(Json(response))
}

async fn cmd_schema_search(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let q = params.get("q").cloned().unwrap_or_default();
    if q.trim().is_empty() {
        return Err(ApiError::bad_request("query parameter `q` must not be empty"));
    }
    let top_k: usize = params.get("top_k").and_then(|v| v.parse().ok()).unwrap_or_else(default_top_k);

    state.catalog.ensure_loaded().await;
    let hits = state.catalog.search_fields(&q, top_k);
    Ok(Json(json!({ "q": q, "hits": hits })))
}
