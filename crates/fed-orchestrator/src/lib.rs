// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Orchestrator (C7): the single entry point that wires the planner,
//! execution engine, and fusion engine into one request/response cycle.
//!
//! This is intentionally single-phase — `status` never transitions, there is
//! no background run to poll. A request either comes back `COMPLETE` with
//! whatever the fusion engine could assemble, or the handler returns before
//! ever constructing a [`FederationResponse`] (an orchestrator-level error,
//! e.g. the catalog failed to load any source).

use fed_catalog::SchemaCatalog;
use fed_executor::ExecutionEngine;
use fed_fusion::{fuse, FusedResponse};
use fed_planner::Planner;
use serde::Serialize;
use serde_json::Map;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// API-facing status. Always `Complete` today — kept as an enum rather than
/// a bare string so a future multi-phase mode has somewhere to grow into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Complete,
}

/// The top-level response returned by `POST /api/v1/query`.
#[derive(Debug, Clone, Serialize)]
pub struct FederationResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub fused_data: FusedResponse,
    pub explain: Vec<String>,
}

/// Wires [`Planner`] → [`ExecutionEngine`] → [`fuse`] behind a single call.
pub struct Orchestrator {
    catalog: Arc<SchemaCatalog>,
    planner: Planner,
    executor: ExecutionEngine,
}

impl Orchestrator {
    #[must_use]
    pub fn new(catalog: Arc<SchemaCatalog>, planner: Planner, executor: ExecutionEngine) -> Self {
        Self { catalog, planner, executor }
    }

    /// Handle a single federated-query request end to end.
    ///
    /// `user_id` and `context` are accepted for parity with the request
    /// envelope but do not currently influence planning; they are carried
    /// through so a future planner revision can use them without an API
    /// break.
    pub async fn handle(&self, user_id: &str, nl_query: &str, context: &Map<String, serde_json::Value>) -> FederationResponse {
        let request_id = Uuid::new_v4();
        let _ = context;
        info!(target: "fed.orchestrator", %request_id, user_id, nl_query, "handling federated query");

        self.catalog.ensure_loaded().await;
        let plan = self.planner.plan(nl_query).await;
        let tasks = self.executor.execute(&plan).await;
        let fused = fuse(&tasks, nl_query);

        info!(target: "fed.orchestrator", %request_id, steps = plan.len(), "federated query complete");

        FederationResponse {
            request_id,
            status: RequestStatus::Complete,
            explain: fused.explain.clone(),
            fused_data: fused,
        }
    }
}
