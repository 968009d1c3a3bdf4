// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Fusion Engine (C6): folds a plan's [`ExecutionTask`]s into the single
//! response shape the API returns, with an `explain` trail and per-field
//! `provenance`.
//!
//! Classification of a task into customer/orders/referrals/similars buckets
//! goes, in priority order: its declared `output_alias`, then its
//! `source_type` prefix, then a substring match on its `source_id`. A task
//! that matches none of these is not dropped — it stays reachable via
//! `provenance` but contributes to no named bucket.

use fed_executor::ExecutionTask;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

const LIST_CUSTOMERS_PHRASES: &[&str] = &[
    "list of all customers",
    "all customers",
    "list all customers",
    "give me a list of all customers",
    "show all customers",
    "list customers",
    "list clients",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Sql,
    Nosql,
    Graph,
    Vector,
    Unclassified,
}

fn classify(task: &ExecutionTask) -> Bucket {
    let source_type = task.meta.source_type.as_deref().unwrap_or("").to_lowercase();
    let source_id = task.source_id.to_lowercase();

    if source_type.starts_with("query.sql") || source_id.contains("sql") {
        Bucket::Sql
    } else if source_type.starts_with("query.document") || source_id.contains("orders") || source_id.contains("mongo") {
        Bucket::Nosql
    } else if source_type.starts_with("query.graph") || source_id.contains("graph") || source_id.contains("neo4j") {
        Bucket::Graph
    } else if source_type.starts_with("query.vector") || source_id.contains("vector") || source_id.contains("milvus") {
        Bucket::Vector
    } else {
        Bucket::Unclassified
    }
}

/// Per-field source attribution, mirroring the shape the API returns.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Provenance {
    Single { source: String, meta: Map<String, Value> },
    Many(Vec<ProvenanceEntry>),
    Inferred {
        inferred_from: String,
        #[serde(rename = "sample_order")]
        sample: Value,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceEntry {
    pub source: String,
    pub meta: Map<String, Value>,
}

/// The assembled, client-facing result of a single federated query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusedResponse {
    pub customer: Map<String, Value>,
    pub customers: Vec<Value>,
    pub recent_orders: Vec<Value>,
    pub referrals: Vec<Value>,
    pub similar_customers: Vec<Value>,
    pub explain: Vec<String>,
    #[serde(serialize_with = "serialize_provenance_map")]
    pub provenance: Vec<(String, Provenance)>,
}

fn serialize_provenance_map<S: serde::Serializer>(
    value: &[(String, Provenance)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(value.len()))?;
    for (k, v) in value {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

impl FusedResponse {
    fn set_provenance(&mut self, key: &str, provenance: Provenance) {
        self.provenance.retain(|(k, _)| k != key);
        self.provenance.push((key.to_string(), provenance));
    }
}

fn tasks_for_alias<'a>(tasks: &'a [ExecutionTask], alias: &str) -> Vec<&'a ExecutionTask> {
    tasks
        .iter()
        .filter(|t| t.meta.output_alias.as_deref().map(str::to_lowercase).as_deref() == Some(alias))
        .collect()
}

fn tasks_for_bucket(tasks: &[ExecutionTask], bucket: Bucket) -> Vec<&ExecutionTask> {
    tasks.iter().filter(|t| classify(t) == bucket).collect()
}

fn sorted_sources(tasks: &[&ExecutionTask]) -> String {
    let set: BTreeSet<&str> = tasks.iter().map(|t| t.source_id.as_str()).collect();
    set.into_iter().collect::<Vec<_>>().join(", ")
}

/// Fuse a plan's execution results into a [`FusedResponse`].
#[must_use]
pub fn fuse(tasks: &[ExecutionTask], nl_query: &str) -> FusedResponse {
    let mut fused = FusedResponse::default();
    let lower_query = nl_query.to_lowercase();
    let is_list_customers = LIST_CUSTOMERS_PHRASES.iter().any(|p| lower_query.contains(p));

    let by_alias_customers = tasks_for_alias(tasks, "customers");
    let sql_tasks = tasks_for_bucket(tasks, Bucket::Sql);
    let customers_tasks = if by_alias_customers.is_empty() { sql_tasks.clone() } else { by_alias_customers };

    if is_list_customers {
        if let Some(first) = customers_tasks.first() {
            fused.customers = first.rows.clone();
            fused.explain.push(format!("Customers from {}", first.source_id));
            fused.set_provenance(
                "customers",
                Provenance::Single { source: first.source_id.clone(), meta: first.meta.extra.clone() },
            );
            return fused;
        }
    }

    let mut primary_customer: Option<Value> = None;
    let by_alias_customer = tasks_for_alias(tasks, "customer");
    if let Some(first) = by_alias_customer.first().filter(|t| !t.rows.is_empty()) {
        primary_customer = first.rows.first().cloned();
        fused.customer = primary_customer.clone().unwrap_or_default().as_object().cloned().unwrap_or_default();
        fused.explain.push(format!("Customer from {}", first.source_id));
        fused.set_provenance(
            "customer",
            Provenance::Single { source: first.source_id.clone(), meta: first.meta.extra.clone() },
        );
    } else if let Some(first) = sql_tasks.first().filter(|t| !t.rows.is_empty()) {
        primary_customer = first.rows.first().cloned();
        fused.customer = primary_customer.clone().unwrap_or_default().as_object().cloned().unwrap_or_default();
        fused.explain.push(format!("Customer from {}", first.source_id));
        fused.set_provenance(
            "customer",
            Provenance::Single { source: first.source_id.clone(), meta: first.meta.extra.clone() },
        );
    }

    let by_alias_orders = tasks_for_alias(tasks, "recent_orders");
    let nosql_tasks = tasks_for_bucket(tasks, Bucket::Nosql);
    let orders_tasks = if by_alias_orders.is_empty() { nosql_tasks } else { by_alias_orders };
    for t in &orders_tasks {
        fused.recent_orders.extend(t.rows.iter().cloned());
    }
    if !orders_tasks.is_empty() {
        fused.explain.push(format!("Orders from {}", sorted_sources(&orders_tasks)));
        fused.set_provenance(
            "recent_orders",
            Provenance::Many(
                orders_tasks
                    .iter()
                    .map(|t| ProvenanceEntry { source: t.source_id.clone(), meta: t.meta.extra.clone() })
                    .collect(),
            ),
        );
    }

    let by_alias_referrals = tasks_for_alias(tasks, "referrals");
    let graph_tasks = tasks_for_bucket(tasks, Bucket::Graph);
    let referrals_tasks = if by_alias_referrals.is_empty() { graph_tasks } else { by_alias_referrals };
    for t in &referrals_tasks {
        fused.referrals.extend(t.rows.iter().cloned());
    }
    if !referrals_tasks.is_empty() {
        fused.explain.push(format!("Referrals from {}", sorted_sources(&referrals_tasks)));
        fused.set_provenance(
            "referrals",
            Provenance::Many(
                referrals_tasks
                    .iter()
                    .map(|t| ProvenanceEntry { source: t.source_id.clone(), meta: t.meta.extra.clone() })
                    .collect(),
            ),
        );
    }

    let by_alias_similar = tasks_for_alias(tasks, "similar_customers");
    let vector_tasks = tasks_for_bucket(tasks, Bucket::Vector);
    let similars_tasks = if by_alias_similar.is_empty() { vector_tasks } else { by_alias_similar };
    for t in &similars_tasks {
        fused.similar_customers.extend(t.rows.iter().cloned());
    }
    if !similars_tasks.is_empty() {
        fused.explain.push(format!("Similar customers from {}", sorted_sources(&similars_tasks)));
        fused.set_provenance(
            "similar_customers",
            Provenance::Many(
                similars_tasks
                    .iter()
                    .map(|t| ProvenanceEntry { source: t.source_id.clone(), meta: t.meta.extra.clone() })
                    .collect(),
            ),
        );
    }

    if primary_customer.is_none() {
        if let Some(first_order) = fused.recent_orders.first() {
            let cid = first_order
                .get("customer_id")
                .or_else(|| first_order.get("cust_id"))
                .cloned();
            if let Some(cid) = cid {
                let mut obj = Map::new();
                obj.insert("id".to_string(), cid);
                fused.customer = obj;
                fused.explain.push("Inferred primary customer from recent orders".to_string());
                fused.set_provenance(
                    "customer",
                    Provenance::Inferred { inferred_from: "orders".to_string(), sample: first_order.clone() },
                );
            }
        }
    }

    fused
}
