// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Execution Engine (C5): walks a plan in order, resolves cross-step
//! references, dispatches each step, and normalizes heterogeneous backend
//! responses into a uniform task.
//!
//! Steps run strictly sequentially: dependencies form a small forward DAG
//! and plans are short, so simplicity wins over speculative parallelism
//! here (see the design notes this mirrors in the ordered-map-plus-append
//! shape of [`Pipeline`](fed_dispatcher) style executors elsewhere in this
//! tree). The engine never aborts a plan on a single step's failure —
//! failures are folded into that step's task instead.

use fed_dispatcher::{Tool, ToolDispatcher};
use fed_planner::PlanStep;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Metadata carried alongside a task's normalized rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskMeta {
    pub source_id: String,
    pub source_type: Option<String>,
    pub last_updated: Option<String>,
    pub output_alias: Option<String>,
    pub extra: Map<String, Value>,
}

/// The uniform result of dispatching one plan step.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTask {
    pub task_id: Uuid,
    pub plan_step_id: String,
    pub source_id: String,
    pub native_query: String,
    pub rows: Vec<Value>,
    pub meta: TaskMeta,
}

/// Walks a validated plan and dispatches every step via a [`ToolDispatcher`].
pub struct ExecutionEngine {
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Execute `plan` in order, returning one task per non-skipped step.
    pub async fn execute(&self, plan: &[PlanStep]) -> Vec<ExecutionTask> {
        let mut results_by_id: HashMap<String, ExecutionTask> = HashMap::new();
        let mut output = Vec::with_capacity(plan.len());

        for step in plan {
            if let Some(dep_id) = &step.depends_on {
                let dep_satisfied = results_by_id.get(dep_id).is_some_and(|t| !t.rows.is_empty());
                if !dep_satisfied {
                    if step.optional {
                        debug!(target: "fed.executor", step_id = %step.id, dep_id, "skipping optional step, dependency unmet");
                        continue;
                    }
                    let task = failed_task(step, format!("Dependency {dep_id} not found"));
                    results_by_id.insert(step.id.clone(), task.clone());
                    output.push(task);
                    continue;
                }
            }

            let resolved_input = self.resolve_references(step, &results_by_id);
            let tool: Tool = step.tool.into();

            let task = match self.dispatcher.call(&step.mcp_id, tool, Value::Object(resolved_input.clone())).await {
                Ok(response) => build_task(step, tool, &resolved_input, response),
                Err(e) => {
                    warn!(target: "fed.executor", step_id = %step.id, error = %e, "dispatch failed");
                    failed_task(step, e.to_string())
                }
            };

            results_by_id.insert(step.id.clone(), task.clone());
            output.push(task);
        }

        output
    }

    /// Resolve every `_from`-suffixed input key against prior task results.
    fn resolve_references(&self, step: &PlanStep, results_by_id: &HashMap<String, ExecutionTask>) -> Map<String, Value> {
        let mut resolved = Map::new();
        for (key, value) in &step.input {
            if let Some(target_key) = key.strip_suffix("_from") {
                let Some(reference) = value.as_str() else {
                    debug!(target: "fed.executor", step_id = %step.id, key, "_from value is not a string, omitting");
                    continue;
                };
                match resolve_ref(results_by_id, reference) {
                    Some(resolved_value) => {
                        resolved.insert(target_key.to_string(), resolved_value);
                    }
                    None => {
                        debug!(target: "fed.executor", step_id = %step.id, reference, "could not resolve reference, omitting key");
                    }
                }
            } else {
                resolved.insert(key.clone(), resolve_nested(value, results_by_id));
            }
        }
        resolved
    }
}

/// Recursively resolve `_from` keys nested inside object values (e.g. a
/// `filter` object containing `customer_id_from`).
fn resolve_nested(value: &Value, results_by_id: &HashMap<String, ExecutionTask>) -> Value {
    match value {
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, inner) in map {
                if let Some(target_key) = key.strip_suffix("_from") {
                    if let Some(reference) = inner.as_str() {
                        if let Some(resolved_value) = resolve_ref(results_by_id, reference) {
                            resolved.insert(target_key.to_string(), resolved_value);
                            continue;
                        }
                    }
                    continue;
                }
                resolved.insert(key.clone(), resolve_nested(inner, results_by_id));
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}

/// Resolve a `<step_id>.<field>[.<field>...]` reference against the first
/// row of the referenced step's result.
pub fn resolve_ref(results_by_id: &HashMap<String, ExecutionTask>, reference: &str) -> Option<Value> {
    let mut segments = reference.split('.');
    let step_id = segments.next()?;
    let task = results_by_id.get(step_id)?;
    let first_row = task.rows.first()?;

    let mut current = first_row;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Normalize a backend response body into `rows` by examining, in order,
/// `rows`, `docs`, `matches`, `data`; a bare JSON array is used directly.
fn normalize_rows(response: &Value) -> Vec<Value> {
    for key in ["rows", "docs", "matches", "data"] {
        if let Some(Value::Array(arr)) = response.get(key) {
            return arr.clone();
        }
    }
    if let Value::Array(arr) = response {
        return arr.clone();
    }
    Vec::new()
}

fn build_task(step: &PlanStep, tool: Tool, resolved_input: &Map<String, Value>, response: Value) -> ExecutionTask {
    let rows = normalize_rows(&response);

    let mut extra = Map::new();
    let mut source_type = None;
    let mut last_updated = None;
    if let Some(Value::Object(meta_obj)) = response.get("meta") {
        for (key, value) in meta_obj {
            match key.as_str() {
                "source_id" => {}
                "source_type" => source_type = value.as_str().map(str::to_string),
                "last_updated" => last_updated = value.as_str().map(str::to_string),
                other => {
                    extra.insert(other.to_string(), value.clone());
                }
            }
        }
    }

    let native_query = resolved_input
        .get("query")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{tool}({})", Value::Object(resolved_input.clone())));

    ExecutionTask {
        task_id: Uuid::new_v4(),
        plan_step_id: step.id.clone(),
        source_id: step.mcp_id.clone(),
        native_query,
        rows,
        meta: TaskMeta {
            source_id: step.mcp_id.clone(),
            source_type,
            last_updated,
            output_alias: step.output_alias.clone(),
            extra,
        },
    }
}

fn failed_task(step: &PlanStep, error_message: String) -> ExecutionTask {
    let mut extra = Map::new();
    extra.insert("error".to_string(), Value::String(error_message));
    ExecutionTask {
        task_id: Uuid::new_v4(),
        plan_step_id: step.id.clone(),
        source_id: step.mcp_id.clone(),
        native_query: String::new(),
        rows: Vec::new(),
        meta: TaskMeta {
            source_id: step.mcp_id.clone(),
            source_type: None,
            last_updated: None,
            output_alias: step.output_alias.clone(),
            extra,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_backend_mock::{MockToolDispatcher, GRAPH_REFERRALS, ORDERS_MONGO, SQL_CUSTOMERS};
    use fed_catalog::DbType;
    use fed_planner::ToolKind;
    use serde_json::json;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(MockToolDispatcher::new()))
    }

    fn step(id: &str, mcp_id: &str, db_type: DbType, tool: ToolKind, input: Map<String, Value>) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            description: String::new(),
            mcp_id: mcp_id.to_string(),
            db_type,
            tool,
            input,
            depends_on: None,
            output_alias: None,
            optional: false,
        }
    }

    #[tokio::test]
    async fn execute_single_step_populates_rows_and_native_query() {
        let plan = vec![step(
            "p1",
            SQL_CUSTOMERS,
            DbType::Sql,
            ToolKind::ExecuteSql,
            [("query".to_string(), json!("SELECT id,name,email FROM customers WHERE id = ?")), ("params".to_string(), json!(["cust001"]))]
                .into_iter()
                .collect(),
        )];
        let tasks = engine().execute(&plan).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].rows.len(), 1);
        assert!(tasks[0].native_query.starts_with("SELECT"));
    }

    #[tokio::test]
    async fn dependent_step_resolves_reference_from_prior_row() {
        let mut p1 = step(
            "p1",
            SQL_CUSTOMERS,
            DbType::Sql,
            ToolKind::ExecuteSql,
            [("query".to_string(), json!("SELECT id,name,email FROM customers WHERE id = ?")), ("params".to_string(), json!(["cust001"]))]
                .into_iter()
                .collect(),
        );
        p1.output_alias = Some("customer".to_string());
        let mut p2 = step(
            "p2",
            ORDERS_MONGO,
            DbType::Nosql,
            ToolKind::Find,
            [(
                "filter".to_string(),
                json!({"customer_id_from": "p1.id"}),
            ), ("limit".to_string(), json!(5))]
            .into_iter()
            .collect(),
        );
        p2.depends_on = Some("p1".to_string());

        let tasks = engine().execute(&[p1, p2]).await;
        assert_eq!(tasks.len(), 2);
        assert!(tasks[1].rows.iter().all(|r| r["customer_id"] == "cust001"));
    }

    #[tokio::test]
    async fn missing_required_dependency_emits_failed_task_and_continues() {
        let mut orphan = step(
            "p2",
            ORDERS_MONGO,
            DbType::Nosql,
            ToolKind::Find,
            Map::new(),
        );
        orphan.depends_on = Some("p1".to_string());
        let tasks = engine().execute(&[orphan]).await;
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].rows.is_empty());
        assert!(tasks[0].meta.extra.get("error").unwrap().as_str().unwrap().contains("Dependency p1"));
    }

    #[tokio::test]
    async fn optional_step_with_unmet_dependency_is_skipped_not_failed() {
        let mut orphan = step("p2", GRAPH_REFERRALS, DbType::Graph, ToolKind::Traverse, Map::new());
        orphan.depends_on = Some("p1".to_string());
        orphan.optional = true;
        let tasks = engine().execute(&[orphan]).await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn dispatch_error_becomes_failed_task_not_abort() {
        let plan = vec![step("p1", "unregistered_source", DbType::Sql, ToolKind::ExecuteSql, Map::new())];
        let tasks = engine().execute(&plan).await;
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].meta.extra.contains_key("error"));
    }

    #[test]
    fn resolve_ref_walks_nested_path() {
        let mut results = HashMap::new();
        results.insert(
            "p1".to_string(),
            ExecutionTask {
                task_id: Uuid::new_v4(),
                plan_step_id: "p1".to_string(),
                source_id: "vector_customers".to_string(),
                native_query: String::new(),
                rows: vec![json!({"embedding": [0.1, 0.2, 0.3], "id": "cust050"})],
                meta: TaskMeta::default(),
            },
        );
        assert_eq!(resolve_ref(&results, "p1.embedding"), Some(json!([0.1, 0.2, 0.3])));
        assert_eq!(resolve_ref(&results, "p1.id"), Some(json!("cust050")));
        assert_eq!(resolve_ref(&results, "p1.missing"), None);
        assert_eq!(resolve_ref(&results, "unknown.field"), None);
    }

    #[test]
    fn normalize_rows_prefers_rows_then_docs_then_matches_then_data() {
        assert_eq!(normalize_rows(&json!({"rows": [1], "docs": [2]})), vec![json!(1)]);
        assert_eq!(normalize_rows(&json!({"docs": [2], "matches": [3]})), vec![json!(2)]);
        assert_eq!(normalize_rows(&json!({"matches": [3], "data": [4]})), vec![json!(3)]);
        assert_eq!(normalize_rows(&json!({"data": [4]})), vec![json!(4)]);
        assert_eq!(normalize_rows(&json!([5, 6])), vec![json!(5), json!(6)]);
        assert_eq!(normalize_rows(&json!({})), Vec::<Value>::new());
    }
}
