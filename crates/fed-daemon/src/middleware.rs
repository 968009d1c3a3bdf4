// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the federator daemon HTTP API.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

/// Generates a request id for each request and echoes it as `x-request-id`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let id = Uuid::new_v4();
    let mut resp = next.run(req).await;
    resp.headers_mut().insert("x-request-id", HeaderValue::from_str(&id.to_string()).unwrap());
    resp
}

/// Logs method, path, status, and duration for each request.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        target: "fed.daemon",
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    resp
}

/// Permissive CORS suitable for local development.
#[must_use]
pub fn permissive_cors() -> CorsLayer {
    CorsLayer::permissive()
}
