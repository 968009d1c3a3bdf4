// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Planner (C4): composes the LLM prompt, invokes the language model,
//! parses/validates the returned plan, and falls back to a deterministic
//! heuristic plan when the LLM is unavailable or its output is unusable.

use async_trait::async_trait;
use fed_catalog::{DbType, SchemaCatalog};
use fed_dispatcher::Tool;
use fed_error::FedError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// A single step in an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub mcp_id: String,
    pub db_type: DbType,
    pub tool: ToolKind,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub output_alias: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Serializable mirror of [`fed_dispatcher::Tool`] (that type intentionally
/// has no serde impl since it is also used on the HTTP hot path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ExecuteSql,
    Find,
    Traverse,
    Search,
    GetSchema,
}

impl From<ToolKind> for Tool {
    fn from(kind: ToolKind) -> Self {
        match kind {
            ToolKind::ExecuteSql => Tool::ExecuteSql,
            ToolKind::Find => Tool::Find,
            ToolKind::Traverse => Tool::Traverse,
            ToolKind::Search => Tool::Search,
            ToolKind::GetSchema => Tool::GetSchema,
        }
    }
}

impl ToolKind {
    #[must_use]
    pub fn matches(self, tool: Tool) -> bool {
        Tool::from(self) == tool
    }
}

/// The LLM client seam. All parsing/validation lives in the planner, not
/// inside an implementation of this trait — it is treated as opaque I/O that
/// returns text, per the design notes on keeping the planner deterministic
/// to test with a stub.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, FedError>;
}

/// Deterministic canned-response client. Useful for exercising the
/// LLM-plan path in isolation, but not query-aware, so `fed-daemon`
/// defaults to [`HeuristicOnlyLlmClient`] instead.
pub struct MockLlmClient {
    canned_response: String,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            canned_response: serde_json::json!([{
                "id": "p1",
                "description": "List customers (mock)",
                "mcp_id": "sql_customers",
                "db_type": "sql",
                "tool": "execute_sql",
                "input": {"query": "SELECT id,name,email FROM customers LIMIT 50"},
                "output_alias": "customer",
            }])
            .to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String, FedError> {
        Ok(self.canned_response.clone())
    }
}

/// Always reports unavailable, unconditionally forcing the heuristic
/// fallback — the concrete form of "the LLM client is unavailable."
pub struct HeuristicOnlyLlmClient;

#[async_trait]
impl LlmClient for HeuristicOnlyLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String, FedError> {
        Err(FedError::new(
            fed_error::ErrorCode::PlanParseError,
            "no hosted LLM configured; heuristic-only mode",
        ))
    }
}

const PROMPT_TEMPLATE_HEADER: &str = "\
You are a query planner for a polyglot data federator. Given a natural \
language question and a JSON description of the available data sources, \
emit a JSON array of plan steps ONLY (no prose). Each step has the fields: \
id, description, mcp_id, db_type, tool, input, depends_on?, output_alias, \
optional?. `execute_sql` steps take input {query, params?} and the query \
must be a single SELECT statement using `?` positional placeholders. \
`find` steps take input {filter, limit?, sort?}. `traverse` steps take \
input {start:{property,value}, rel, depth} (rel defaults to \"REFERRED\", \
depth defaults to 1). `search` steps take input {embedding, top_k} or \
{embedding_from:\"<step_id>.<field>\", top_k}. Every step must set \
output_alias. Reference an earlier step's result with a key ending in \
`_from` whose value is \"<step_id>.<field>[.<field>...]\".\n\
\n\
Example 1 — \"What is the email for customer cust001?\"\n\
[{\"id\":\"p1\",\"description\":\"Look up customer email\",\"mcp_id\":\"sql_customers\",\
\"db_type\":\"sql\",\"tool\":\"execute_sql\",\
\"input\":{\"query\":\"SELECT id,name,email FROM customers WHERE id = ?\",\"params\":[\"cust001\"]},\
\"output_alias\":\"customer\"}]\n\
\n\
Example 2 — \"Find the email and recent orders for cust001\"\n\
[{\"id\":\"p1\",\"description\":\"Look up customer\",\"mcp_id\":\"sql_customers\",\
\"db_type\":\"sql\",\"tool\":\"execute_sql\",\
\"input\":{\"query\":\"SELECT id,name,email FROM customers WHERE id = ?\",\"params\":[\"cust001\"]},\
\"output_alias\":\"customer\"},\
{\"id\":\"p2\",\"description\":\"Recent orders\",\"mcp_id\":\"orders_mongo\",\
\"db_type\":\"nosql\",\"tool\":\"find\",\
\"input\":{\"filter\":{\"customer_id_from\":\"p1.id\"},\"limit\":5},\
\"depends_on\":\"p1\",\"output_alias\":\"recent_orders\"}]\n";

const LIST_CUSTOMERS_PHRASES: &[&str] = &[
    "list of all customers",
    "all customers",
    "list all customers",
    "give me a list of all customers",
    "show all customers",
    "list customers",
    "list clients",
];

fn build_prompt(nl_query: &str, sources: &[fed_catalog::SourceDescriptor]) -> String {
    let sources_json = serde_json::to_string_pretty(sources).unwrap_or_default();
    format!("{PROMPT_TEMPLATE_HEADER}\nQuery: {nl_query}\nSources: {sources_json}\n")
}

/// Find the first well-bracketed `[...]` JSON array substring in `text`.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract a `custNNN`-shaped customer id mentioned in free text, if any.
fn extract_customer_id(nl_query: &str) -> Option<String> {
    let lower = nl_query.to_lowercase();
    let bytes = lower.as_bytes();
    for (i, _) in lower.match_indices("cust") {
        let mut j = i + 4;
        let digit_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digit_start {
            let digits = &lower[digit_start..j];
            if let Ok(n) = digits.parse::<u32>() {
                return Some(format!("cust{n:03}"));
            }
        }
    }
    for (i, _) in lower.match_indices("customer") {
        let mut j = i + "customer".len();
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        let digit_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digit_start {
            let digits = &lower[digit_start..j];
            if let Ok(n) = digits.parse::<u32>() {
                return Some(format!("cust{n:03}"));
            }
        }
    }
    None
}

/// Validates and (when needed) generates execution plans.
pub struct Planner {
    catalog: Arc<SchemaCatalog>,
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    #[must_use]
    pub fn new(catalog: Arc<SchemaCatalog>, llm: Arc<dyn LlmClient>) -> Self {
        Self { catalog, llm }
    }

    /// Produce a validated plan for `nl_query`.
    pub async fn plan(&self, nl_query: &str) -> Vec<PlanStep> {
        self.catalog.ensure_loaded().await;
        let sources = self.catalog.build_sources_for_llm();
        let prompt = build_prompt(nl_query, &sources);

        let llm_steps = match self.llm.complete(&prompt).await {
            Ok(text) => parse_and_validate(&text, &sources),
            Err(e) => {
                debug!(target: "fed.planner", error = %e, "llm unavailable, using heuristic fallback");
                Vec::new()
            }
        };

        if !llm_steps.is_empty() {
            return llm_steps;
        }

        self.heuristic_plan(nl_query, &sources)
    }

    fn heuristic_plan(&self, nl_query: &str, sources: &[fed_catalog::SourceDescriptor]) -> Vec<PlanStep> {
        let lower = nl_query.to_lowercase();
        let is_list_customers = LIST_CUSTOMERS_PHRASES.iter().any(|p| lower.contains(p));
        let mentions_customer = lower.contains("customer") || lower.contains("cust");
        let mentions_orders = lower.contains("order") || lower.contains("purchase");
        let mentions_referral = lower.contains("referral") || lower.contains("referred");
        let mentions_similar = lower.contains("similar") || lower.contains("embedding");

        let sql_source = sources.iter().find(|s| s.db_type == DbType::Sql);
        let nosql_source = sources.iter().find(|s| s.db_type == DbType::Nosql);
        let graph_source = sources.iter().find(|s| s.db_type == DbType::Graph);
        let vector_source = sources.iter().find(|s| s.db_type == DbType::Vector);

        let mut steps = Vec::new();
        let mut next_id = 1usize;
        let mut fresh_id = || {
            let id = format!("p{next_id}");
            next_id += 1;
            id
        };

        if is_list_customers {
            if let Some(src) = sql_source {
                steps.push(PlanStep {
                    id: fresh_id(),
                    description: "List all customers".to_string(),
                    mcp_id: src.mcp_id.clone(),
                    db_type: DbType::Sql,
                    tool: ToolKind::ExecuteSql,
                    input: obj(&[("query", "SELECT id,name,email FROM customers".into())]),
                    depends_on: None,
                    output_alias: Some("customers".to_string()),
                    optional: false,
                });
                return steps;
            }
        }

        let target_id = extract_customer_id(&lower);

        let mut customer_step_id = None;
        if mentions_customer {
            if let Some(src) = sql_source {
                let id = fresh_id();
                let query = if let Some(target) = &target_id {
                    ("SELECT id,name,email FROM customers WHERE id = ?", Some(target.clone()))
                } else {
                    ("SELECT id,name,email FROM customers LIMIT 50", None)
                };
                let mut input = obj(&[("query", query.0.into())]);
                if let Some(target) = query.1 {
                    input.insert("params".to_string(), serde_json::json!([target]));
                }
                customer_step_id = Some(id.clone());
                steps.push(PlanStep {
                    id,
                    description: "Look up customer".to_string(),
                    mcp_id: src.mcp_id.clone(),
                    db_type: DbType::Sql,
                    tool: ToolKind::ExecuteSql,
                    input,
                    depends_on: None,
                    output_alias: Some("customer".to_string()),
                    optional: false,
                });
            }
        }

        if mentions_orders {
            if let Some(src) = nosql_source {
                let id = fresh_id();
                let (filter, depends_on) = if let Some(prev) = &customer_step_id {
                    (obj(&[("customer_id_from", format!("{prev}.id").into())]), Some(prev.clone()))
                } else {
                    (serde_json::Map::new(), None)
                };
                let mut input = serde_json::Map::new();
                input.insert("filter".to_string(), serde_json::Value::Object(filter));
                input.insert("limit".to_string(), serde_json::json!(5));
                steps.push(PlanStep {
                    id,
                    description: "Recent orders".to_string(),
                    mcp_id: src.mcp_id.clone(),
                    db_type: DbType::Nosql,
                    tool: ToolKind::Find,
                    input,
                    depends_on,
                    output_alias: Some("recent_orders".to_string()),
                    optional: false,
                });
            }
        }

        if mentions_referral {
            if let Some(src) = graph_source {
                let id = fresh_id();
                let start_value = target_id.clone().unwrap_or_else(|| "cust001".to_string());
                steps.push(PlanStep {
                    id,
                    description: "Referrals".to_string(),
                    mcp_id: src.mcp_id.clone(),
                    db_type: DbType::Graph,
                    tool: ToolKind::Traverse,
                    input: obj(&[(
                        "start",
                        serde_json::json!({"property": "id", "value": start_value}),
                    ), ("rel", "REFERRED".into()), ("depth", serde_json::json!(1))]),
                    depends_on: None,
                    output_alias: Some("referrals".to_string()),
                    optional: true,
                });
            }
        }

        if mentions_similar {
            if let Some(src) = vector_source {
                let id = fresh_id();
                let seed_id = target_id.clone().unwrap_or_else(|| "cust001".to_string());
                steps.push(PlanStep {
                    id,
                    description: "Similar customers".to_string(),
                    mcp_id: src.mcp_id.clone(),
                    db_type: DbType::Vector,
                    tool: ToolKind::Search,
                    input: obj(&[("customer_id", seed_id.into()), ("top_k", serde_json::json!(3))]),
                    depends_on: None,
                    output_alias: Some("similar_customers".to_string()),
                    optional: true,
                });
            }
        }

        if steps.is_empty() {
            if let Some(src) = sql_source {
                steps.push(PlanStep {
                    id: fresh_id(),
                    description: "Conservative customer lookup".to_string(),
                    mcp_id: src.mcp_id.clone(),
                    db_type: DbType::Sql,
                    tool: ToolKind::ExecuteSql,
                    input: obj(&[("query", "SELECT id,name,email FROM customers LIMIT 50".into())]),
                    depends_on: None,
                    output_alias: Some("customer".to_string()),
                    optional: false,
                });
            }
        }

        steps
    }
}

fn obj(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn parse_and_validate(text: &str, sources: &[fed_catalog::SourceDescriptor]) -> Vec<PlanStep> {
    let Some(json_text) = extract_json_array(text) else {
        warn!(target: "fed.planner", "no JSON array found in LLM output");
        return Vec::new();
    };
    let raw: Vec<serde_json::Value> = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "fed.planner", error = %e, "failed to parse LLM plan JSON");
            return Vec::new();
        }
    };

    let mut validated: Vec<PlanStep> = Vec::new();
    for (idx, raw_step) in raw.into_iter().enumerate() {
        let mut step: PlanStep = match serde_json::from_value(raw_step) {
            Ok(s) => s,
            Err(e) => {
                debug!(target: "fed.planner", error = %e, "dropping malformed step");
                continue;
            }
        };
        if step.id.is_empty() {
            step.id = format!("p{}", validated.len() + 1);
        }

        let Some(source) = sources.iter().find(|s| s.mcp_id == step.mcp_id) else {
            debug!(target: "fed.planner", mcp_id = %step.mcp_id, "dropping step with unknown mcp_id");
            continue;
        };
        if source.db_type != step.db_type {
            debug!(target: "fed.planner", step_id = %step.id, "dropping step with db_type mismatch");
            continue;
        }
        if !source.db_type.allowed_tools().iter().any(|t| step.tool.matches(*t)) {
            debug!(target: "fed.planner", step_id = %step.id, "dropping step with disallowed tool");
            continue;
        }
        if let Some(dep) = &step.depends_on {
            if !validated.iter().any(|s: &PlanStep| &s.id == dep) {
                debug!(target: "fed.planner", step_id = %step.id, dep, "dropping step with malformed depends_on");
                continue;
            }
        }
        let mut malformed_ref = false;
        for (key, value) in &step.input {
            if let Some(target_key) = key.strip_suffix("_from") {
                let _ = target_key;
                let Some(reference) = value.as_str() else {
                    malformed_ref = true;
                    break;
                };
                let step_id = reference.split('.').next().unwrap_or_default();
                if step_id.is_empty() || !validated.iter().any(|s: &PlanStep| s.id == step_id) {
                    malformed_ref = true;
                    break;
                }
            }
        }
        if malformed_ref {
            debug!(target: "fed.planner", step_id = %step.id, "dropping step with unresolved forward reference");
            continue;
        }

        let _ = idx;
        validated.push(step);
    }
    validated
}
