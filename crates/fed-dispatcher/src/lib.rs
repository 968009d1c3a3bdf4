// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Tool Dispatcher (C2): a uniform JSON-in/JSON-out call to a backend
//! tool, whatever the transport underneath.
//!
//! [`ToolDispatcher`] is the seam every other component depends on; the real
//! implementation ([`HttpToolDispatcher`]) posts JSON over HTTP to a
//! registered source's host, while the mock backend crate supplies an
//! in-process implementation for local runs and tests.

use async_trait::async_trait;
use fed_error::{ErrorCode, FedError};
use fed_registry::SourceRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The tool names backends expose. `GetSchema` is mandatory on every backend
/// regardless of `db_type`; the others are gated by `db_type` (see
/// `allowed_tools`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ExecuteSql,
    Find,
    Traverse,
    Search,
    GetSchema,
}

impl Tool {
    #[must_use]
    pub fn as_path(self) -> &'static str {
        match self {
            Tool::ExecuteSql => "execute_sql",
            Tool::Find => "find",
            Tool::Traverse => "traverse",
            Tool::Search => "search",
            Tool::GetSchema => "get_schema",
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

/// The uniform call contract every dispatcher implementation satisfies.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Invoke `tool` on `source_id` with `payload`, returning the backend's
    /// JSON response or a [`FedError`] tagged `TransportError`/`ToolError`.
    async fn call(&self, source_id: &str, tool: Tool, payload: Value) -> Result<Value, FedError>;
}

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_SCHEMA_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts JSON payloads to `<host>/<tool>` over HTTP with a per-call timeout.
pub struct HttpToolDispatcher {
    client: reqwest::Client,
    registry: Arc<SourceRegistry>,
    tool_timeout: Duration,
    schema_timeout: Duration,
}

impl HttpToolDispatcher {
    #[must_use]
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self::with_timeouts(registry, DEFAULT_TOOL_TIMEOUT, DEFAULT_SCHEMA_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeouts(registry: Arc<SourceRegistry>, tool_timeout: Duration, schema_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry,
            tool_timeout,
            schema_timeout,
        }
    }
}

#[async_trait]
impl ToolDispatcher for HttpToolDispatcher {
    async fn call(&self, source_id: &str, tool: Tool, payload: Value) -> Result<Value, FedError> {
        let manifest = self.registry.get(source_id).ok_or_else(|| {
            FedError::new(ErrorCode::TransportError, format!("unknown source: {source_id}"))
                .with_context("source_id", source_id)
        })?;

        let url = format!("{}/{}", manifest.host.trim_end_matches('/'), tool.as_path());
        let timeout = if tool == Tool::GetSchema {
            self.schema_timeout
        } else {
            self.tool_timeout
        };

        debug!(target: "fed.dispatcher", source_id, tool = %tool, %url, "dispatching tool call");

        let response = tokio::time::timeout(timeout, self.client.post(&url).json(&payload).send())
            .await
            .map_err(|_| {
                warn!(target: "fed.dispatcher", source_id, tool = %tool, "tool call timed out");
                FedError::new(ErrorCode::TransportError, format!("timed out calling {url}"))
                    .with_context("source_id", source_id)
                    .with_context("tool", tool.as_path())
            })?
            .map_err(|e| {
                FedError::new(ErrorCode::TransportError, format!("request to {url} failed"))
                    .with_context("source_id", source_id)
                    .with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "fed.dispatcher", source_id, tool = %tool, %status, "tool call returned error status");
            return Err(FedError::new(ErrorCode::ToolError, format!("{url} returned {status}"))
                .with_context("source_id", source_id)
                .with_context("status", status.as_u16())
                .with_context("body", body));
        }

        response.json::<Value>().await.map_err(|e| {
            FedError::new(ErrorCode::TransportError, format!("{url} returned non-JSON body"))
                .with_context("source_id", source_id)
                .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_registry::{Capability, Manifest};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn registry_with(server: &MockServer) -> Arc<SourceRegistry> {
        let registry = Arc::new(SourceRegistry::new());
        registry.register(Manifest::new(
            "sql_customers",
            server.uri(),
            [Capability::QuerySql],
        ));
        registry
    }

    #[tokio::test]
    async fn successful_call_returns_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute_sql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"rows": []})))
            .mount(&server)
            .await;

        let dispatcher = HttpToolDispatcher::new(registry_with(&server).await);
        let result = dispatcher
            .call("sql_customers", Tool::ExecuteSql, serde_json::json!({"query": "SELECT 1"}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"rows": []}));
    }

    #[tokio::test]
    async fn non_2xx_status_becomes_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute_sql"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db unavailable"))
            .mount(&server)
            .await;

        let dispatcher = HttpToolDispatcher::new(registry_with(&server).await);
        let err = dispatcher
            .call("sql_customers", Tool::ExecuteSql, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolError);
    }

    #[tokio::test]
    async fn unknown_source_is_transport_error() {
        let server = MockServer::start().await;
        let dispatcher = HttpToolDispatcher::new(registry_with(&server).await);
        let err = dispatcher
            .call("does_not_exist", Tool::GetSchema, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportError);
    }

    #[tokio::test]
    async fn non_json_body_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_schema"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let dispatcher = HttpToolDispatcher::new(registry_with(&server).await);
        let err = dispatcher
            .call("sql_customers", Tool::GetSchema, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportError);
    }
}
