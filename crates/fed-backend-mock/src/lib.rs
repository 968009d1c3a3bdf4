// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Mock Backend (C11): an in-process implementation of the backend tool
//! protocol for every `db_type`, used by default so the whole pipeline runs
//! end-to-end without any external service.
//!
//! Seed data (150 customers, ~8 orders each, a sparse referral DAG, and
//! 3-dimensional embeddings) is generated once at construction from a fixed
//! arithmetic seed so runs are reproducible across processes.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use fed_dispatcher::{Tool, ToolDispatcher};
use fed_error::{ErrorCode, FedError};
use serde_json::{json, Value};

/// Canonical default source ids this mock backend answers for, matching the
/// four-source topology used throughout the scenarios.
pub const SQL_CUSTOMERS: &str = "sql_customers";
pub const ORDERS_MONGO: &str = "orders_mongo";
pub const GRAPH_REFERRALS: &str = "graph_referrals";
pub const VECTOR_CUSTOMERS: &str = "vector_customers";

const CUSTOMER_COUNT: usize = 150;
const ORDERS_PER_CUSTOMER: usize = 8;

#[derive(Debug, Clone)]
struct Customer {
    id: String,
    name: String,
    email: String,
}

#[derive(Debug, Clone)]
struct Order {
    id: String,
    customer_id: String,
    item: String,
    amount_cents: u32,
    placed_at: i64,
}

fn customer_id(n: usize) -> String {
    format!("cust{n:03}")
}

fn seed_customers() -> Vec<Customer> {
    (1..=CUSTOMER_COUNT)
        .map(|n| Customer {
            id: customer_id(n),
            name: format!("Customer {n:03}"),
            email: format!("customer{n:03}@example.com"),
        })
        .collect()
}

fn seed_orders(customers: &[Customer]) -> Vec<Order> {
    let mut orders = Vec::with_capacity(customers.len() * ORDERS_PER_CUSTOMER);
    for (ci, customer) in customers.iter().enumerate() {
        for oi in 0..ORDERS_PER_CUSTOMER {
            let seq = ci * ORDERS_PER_CUSTOMER + oi;
            orders.push(Order {
                id: format!("order{seq:05}"),
                customer_id: customer.id.clone(),
                item: format!("item-{}", (seq % 37) + 1),
                amount_cents: 500 + ((seq * 137) % 9500) as u32,
                // Later orders (higher oi) are more recent.
                placed_at: 1_700_000_000 + (oi as i64) * 86_400,
            });
        }
    }
    orders
}

/// Deterministic sparse referral edges: customer N refers N+7 and N+41
/// (mod the customer count), skipping self-references and wrapping only
/// forward so the graph stays acyclic in the small-index region tests use.
fn referrals_from(customer_n: usize) -> Vec<usize> {
    let mut targets = Vec::new();
    for offset in [7usize, 41usize] {
        let target = customer_n + offset;
        if target <= CUSTOMER_COUNT && target != customer_n {
            targets.push(target);
        }
    }
    targets
}

/// A deterministic 3-dimensional embedding derived from the customer index.
fn embedding_for(customer_n: usize) -> [f64; 3] {
    let n = customer_n as f64;
    [
        (n * 0.017).sin(),
        (n * 0.031).cos(),
        ((n * 0.011) % 1.0) - 0.5,
    ]
}

fn cosine_similarity(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// In-process [`ToolDispatcher`] backing every mock source.
pub struct MockToolDispatcher {
    customers: Vec<Customer>,
    orders: Vec<Order>,
}

impl Default for MockToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        let customers = seed_customers();
        let orders = seed_orders(&customers);
        Self { customers, orders }
    }

    fn find_customer(&self, id: &str) -> Option<&Customer> {
        self.customers.iter().find(|c| c.id == id)
    }

    fn customer_json(c: &Customer) -> Value {
        json!({"id": c.id, "name": c.name, "email": c.email})
    }

    fn order_json(o: &Order) -> Value {
        json!({
            "id": o.id,
            "customer_id": o.customer_id,
            "item": o.item,
            "amount_cents": o.amount_cents,
            "placed_at": Utc.timestamp_opt(o.placed_at, 0).single().map(|t| t.to_rfc3339()),
        })
    }

    fn schema_for(&self, source_id: &str) -> Result<Value, FedError> {
        let schema = match source_id {
            SQL_CUSTOMERS => json!({
                "mcp_id": SQL_CUSTOMERS,
                "db_type": "sql",
                "entities": [{
                    "name": "customers",
                    "kind": "table",
                    "default_id_field": "id",
                    "semantic_tags": ["entity:customer"],
                    "fields": [
                        {"name": "id", "type": "string", "semantic_tags": ["id", "customer_id"]},
                        {"name": "name", "type": "string", "semantic_tags": []},
                        {"name": "email", "type": "string", "semantic_tags": ["email"]},
                    ],
                }],
            }),
            ORDERS_MONGO => json!({
                "mcp_id": ORDERS_MONGO,
                "db_type": "nosql",
                "entities": [{
                    "name": "orders",
                    "kind": "collection",
                    "default_id_field": "id",
                    "semantic_tags": ["entity:order"],
                    "fields": [
                        {"name": "id", "type": "string", "semantic_tags": ["id"]},
                        {"name": "customer_id", "type": "string", "semantic_tags": ["customer_id"]},
                        {"name": "item", "type": "string", "semantic_tags": []},
                        {"name": "amount_cents", "type": "integer", "semantic_tags": []},
                        {"name": "placed_at", "type": "string", "semantic_tags": []},
                    ],
                }],
            }),
            GRAPH_REFERRALS => json!({
                "mcp_id": GRAPH_REFERRALS,
                "db_type": "graph",
                "entities": [{
                    "name": "REFERRED",
                    "kind": "relationship",
                    "semantic_tags": ["referral", "entity:referral"],
                    "fields": [
                        {"name": "customer_id", "type": "string", "semantic_tags": ["customer_id"]},
                    ],
                }],
            }),
            VECTOR_CUSTOMERS => json!({
                "mcp_id": VECTOR_CUSTOMERS,
                "db_type": "vector",
                "entities": [{
                    "name": "customer_embeddings",
                    "kind": "index",
                    "semantic_tags": ["entity:customer"],
                    "fields": [
                        {"name": "embedding", "type": "vector", "semantic_tags": ["embedding"]},
                    ],
                }],
            }),
            other => {
                return Err(FedError::new(ErrorCode::ToolError, format!("no mock schema for source {other}"))
                    .with_context("source_id", other))
            }
        };
        Ok(schema)
    }

    fn execute_sql(&self, payload: &Value) -> Value {
        let query = payload.get("query").and_then(Value::as_str).unwrap_or_default();
        let params: Vec<&Value> = payload
            .get("params")
            .and_then(Value::as_array)
            .map(|a| a.iter().collect())
            .unwrap_or_default();

        if let Some(id) = params.first().and_then(|v| v.as_str()) {
            let rows: Vec<Value> = self
                .find_customer(id)
                .map(|c| vec![Self::customer_json(c)])
                .unwrap_or_default();
            return json!({"rows": rows});
        }

        let limit = extract_limit(query).unwrap_or(self.customers.len());
        let rows: Vec<Value> = self
            .customers
            .iter()
            .take(limit)
            .map(Self::customer_json)
            .collect();
        json!({"rows": rows})
    }

    fn find(&self, payload: &Value) -> Value {
        let filter = payload.get("filter").cloned().unwrap_or_else(|| json!({}));
        let limit = payload
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(ORDERS_PER_CUSTOMER);

        let customer_id = filter.get("customer_id").and_then(Value::as_str);
        let mut matching: Vec<&Order> = self
            .orders
            .iter()
            .filter(|o| customer_id.is_none_or(|id| o.customer_id == id))
            .collect();
        // Most recent first, matching "last N purchases" scenario wording.
        matching.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        matching.truncate(limit);

        let docs: Vec<Value> = matching.into_iter().map(Self::order_json).collect();
        json!({"docs": docs})
    }

    fn traverse(&self, payload: &Value) -> Value {
        let start_value = payload
            .get("start")
            .and_then(|s| s.get("value"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let depth = payload.get("depth").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;

        let Some(start_n) = start_value.strip_prefix("cust").and_then(|s| s.parse::<usize>().ok()) else {
            return json!({"matches": []});
        };

        let mut frontier = vec![start_n];
        let mut visited = std::collections::BTreeSet::new();
        let mut results = Vec::new();
        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for n in &frontier {
                for target in referrals_from(*n) {
                    if visited.insert(target) {
                        results.push(json!({
                            "customer_id": customer_id(target),
                            "referred_by": customer_id(*n),
                        }));
                        next_frontier.push(target);
                    }
                }
            }
            frontier = next_frontier;
        }
        json!({"matches": results})
    }

    fn search(&self, payload: &Value) -> Value {
        let from_vector = payload.get("embedding").and_then(|e| {
            let arr = e.as_array()?;
            let v: Vec<f64> = arr.iter().filter_map(Value::as_f64).collect();
            if v.len() == 3 {
                Some([v[0], v[1], v[2]])
            } else {
                None
            }
        });
        // Planner-side convenience: seed the query embedding from a known
        // customer id rather than requiring the caller to already hold a
        // vector (the heuristic planner does not have one to offer).
        let seed_id = payload.get("customer_id").and_then(Value::as_str);
        let from_seed_id = seed_id
            .and_then(|id| id.strip_prefix("cust"))
            .and_then(|n| n.parse::<usize>().ok())
            .map(embedding_for);

        let Some(query_embedding) = from_vector.or(from_seed_id) else {
            return json!({"matches": []});
        };
        let top_k = payload.get("top_k").and_then(Value::as_u64).unwrap_or(3) as usize;

        let mut scored: Vec<(f64, &Customer)> = self
            .customers
            .iter()
            .enumerate()
            .filter(|(_, c)| seed_id != Some(c.id.as_str()))
            .map(|(idx, c)| (cosine_similarity(&query_embedding, &embedding_for(idx + 1)), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let matches: Vec<Value> = scored
            .into_iter()
            .map(|(score, c)| json!({"id": c.id, "score": score, "metadata": {"name": c.name}}))
            .collect();
        json!({"matches": matches})
    }
}

fn extract_limit(query: &str) -> Option<usize> {
    let upper = query.to_uppercase();
    let idx = upper.find("LIMIT")?;
    query[idx + "LIMIT".len()..]
        .trim()
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[async_trait]
impl ToolDispatcher for MockToolDispatcher {
    async fn call(&self, source_id: &str, tool: Tool, payload: Value) -> Result<Value, FedError> {
        match tool {
            Tool::GetSchema => self.schema_for(source_id),
            Tool::ExecuteSql if source_id == SQL_CUSTOMERS => Ok(self.execute_sql(&payload)),
            Tool::Find if source_id == ORDERS_MONGO => Ok(self.find(&payload)),
            Tool::Traverse if source_id == GRAPH_REFERRALS => Ok(self.traverse(&payload)),
            Tool::Search if source_id == VECTOR_CUSTOMERS => Ok(self.search(&payload)),
            other => Err(FedError::new(
                ErrorCode::ToolError,
                format!("tool {other} not supported by mock source {source_id}"),
            )
            .with_context("source_id", source_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_schema_returns_db_type_per_source() {
        let dispatcher = MockToolDispatcher::new();
        let schema = dispatcher.call(SQL_CUSTOMERS, Tool::GetSchema, json!({})).await.unwrap();
        assert_eq!(schema["db_type"], "sql");
        let schema = dispatcher.call(VECTOR_CUSTOMERS, Tool::GetSchema, json!({})).await.unwrap();
        assert_eq!(schema["db_type"], "vector");
    }

    #[tokio::test]
    async fn execute_sql_list_all_returns_at_least_100() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(SQL_CUSTOMERS, Tool::ExecuteSql, json!({"query": "SELECT id,name,email FROM customers"}))
            .await
            .unwrap();
        let rows = resp["rows"].as_array().unwrap();
        assert!(rows.len() >= 100);
        assert!(rows[0].get("id").is_some());
    }

    #[tokio::test]
    async fn execute_sql_with_param_finds_single_customer() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(
                SQL_CUSTOMERS,
                Tool::ExecuteSql,
                json!({"query": "SELECT id,name,email FROM customers WHERE id = ?", "params": ["cust001"]}),
            )
            .await
            .unwrap();
        let rows = resp["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["email"], "customer001@example.com");
    }

    #[tokio::test]
    async fn find_orders_filters_by_customer_and_respects_limit() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(ORDERS_MONGO, Tool::Find, json!({"filter": {"customer_id": "cust001"}, "limit": 5}))
            .await
            .unwrap();
        let docs = resp["docs"].as_array().unwrap();
        assert_eq!(docs.len(), 5);
        assert!(docs.iter().all(|d| d["customer_id"] == "cust001"));
    }

    #[tokio::test]
    async fn traverse_referrals_is_array_even_for_leaf_nodes() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(
                GRAPH_REFERRALS,
                Tool::Traverse,
                json!({"start": {"property": "id", "value": "cust010"}, "rel": "REFERRED", "depth": 1}),
            )
            .await
            .unwrap();
        assert!(resp["matches"].is_array());
    }

    #[tokio::test]
    async fn traverse_from_near_end_may_be_empty_but_not_error() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(
                GRAPH_REFERRALS,
                Tool::Traverse,
                json!({"start": {"property": "id", "value": "cust150"}, "rel": "REFERRED", "depth": 1}),
            )
            .await
            .unwrap();
        assert_eq!(resp["matches"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn search_returns_up_to_top_k_with_scores() {
        let dispatcher = MockToolDispatcher::new();
        let query_embedding = embedding_for(50);
        let resp = dispatcher
            .call(
                VECTOR_CUSTOMERS,
                Tool::Search,
                json!({"embedding": query_embedding, "top_k": 3}),
            )
            .await
            .unwrap();
        let matches = resp["matches"].as_array().unwrap();
        assert!(matches.len() <= 3);
        assert!(matches[0].get("score").is_some());
        assert!(matches[0]["metadata"].get("name").is_some());
    }

    #[tokio::test]
    async fn search_without_embedding_returns_empty_not_error() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(VECTOR_CUSTOMERS, Tool::Search, json!({"top_k": 3}))
            .await
            .unwrap();
        assert_eq!(resp["matches"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn search_by_customer_id_excludes_self_from_results() {
        let dispatcher = MockToolDispatcher::new();
        let resp = dispatcher
            .call(VECTOR_CUSTOMERS, Tool::Search, json!({"customer_id": "cust050", "top_k": 3}))
            .await
            .unwrap();
        let matches = resp["matches"].as_array().unwrap();
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| m["id"] != "cust050"));
    }

    #[tokio::test]
    async fn unknown_tool_for_source_is_tool_error() {
        let dispatcher = MockToolDispatcher::new();
        let err = dispatcher.call(SQL_CUSTOMERS, Tool::Traverse, json!({})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolError);
    }
}
