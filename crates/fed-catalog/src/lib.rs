// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Schema Catalog (C3): typed per-source schemas, lazily populated via
//! the dispatcher, rendered into a compact descriptor for the planner.

use fed_dispatcher::{Tool, ToolDispatcher};
use fed_error::{ErrorCode, FedError};
use fed_registry::SourceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Which family of database a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Sql,
    Nosql,
    Graph,
    Vector,
}

impl DbType {
    /// The tools a source of this `db_type` is allowed to expose, per §4.2.
    #[must_use]
    pub fn allowed_tools(self) -> &'static [Tool] {
        match self {
            DbType::Sql => &[Tool::ExecuteSql, Tool::GetSchema],
            DbType::Nosql => &[Tool::Find, Tool::GetSchema],
            DbType::Graph => &[Tool::Traverse, Tool::GetSchema],
            DbType::Vector => &[Tool::Search, Tool::GetSchema],
        }
    }

    /// The primary (non-schema) tool for this `db_type`, used when a plan
    /// step omits `tool` and it must be inferred.
    #[must_use]
    pub fn default_tool(self) -> Tool {
        match self {
            DbType::Sql => Tool::ExecuteSql,
            DbType::Nosql => Tool::Find,
            DbType::Graph => Tool::Traverse,
            DbType::Vector => Tool::Search,
        }
    }
}

/// A single field on an [`Entity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
}

/// What kind of schema object an [`Entity`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Table,
    Collection,
    Node,
    Relationship,
    Index,
}

/// A table/collection/node-label/relationship/index within a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
    #[serde(default)]
    pub default_id_field: Option<String>,
}

/// The typed schema for a single registered source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSchema {
    pub mcp_id: String,
    pub db_type: DbType,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// Compact, LLM-facing rendering of one source, produced by
/// [`SchemaCatalog::build_sources_for_llm`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceDescriptor {
    pub mcp_id: String,
    pub db_type: DbType,
    pub tools: Vec<&'static str>,
    pub entities: Vec<EntityDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub semantic_tags: Vec<String>,
    pub default_id_field: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub semantic_tags: Vec<String>,
}

/// A heuristic match produced by [`SchemaCatalog::discover_candidates`].
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub mcp_id: String,
    pub db_type: DbType,
    pub entity_name: String,
    pub entity_tags: Vec<String>,
    pub score: f64,
}

/// A single field hit produced by the debug `search_fields` operation.
#[derive(Debug, Clone, Serialize)]
pub struct FieldHit {
    pub id: String,
    pub mcp: String,
    pub parent: String,
    pub field: String,
    pub score: f64,
}

/// Typed, lazily-populated per-source schema catalog.
pub struct SchemaCatalog {
    registry: Arc<SourceRegistry>,
    dispatcher: Arc<dyn ToolDispatcher>,
    schemas: RwLock<HashMap<String, SourceSchema>>,
    init: OnceCell<()>,
}

impl SchemaCatalog {
    #[must_use]
    pub fn new(registry: Arc<SourceRegistry>, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            schemas: RwLock::new(HashMap::new()),
            init: OnceCell::new(),
        }
    }

    /// Populate the catalog from every registered source, exactly once.
    ///
    /// Concurrent first callers share a single population pass: the
    /// underlying [`OnceCell`] guarantees only one initializing future runs,
    /// and every other caller awaits its completion.
    pub async fn ensure_loaded(&self) {
        self.init
            .get_or_init(|| async {
                for source_id in self.registry.ids() {
                    match self.dispatcher.call(&source_id, Tool::GetSchema, serde_json::json!({})).await {
                        Ok(body) => match serde_json::from_value::<SourceSchema>(body) {
                            Ok(schema) => {
                                self.schemas
                                    .write()
                                    .expect("schema catalog lock poisoned")
                                    .insert(source_id.clone(), schema);
                                debug!(target: "fed.catalog", source_id, "schema loaded");
                            }
                            Err(e) => {
                                warn!(target: "fed.catalog", source_id, error = %e, "schema response malformed, skipping");
                            }
                        },
                        Err(e) => {
                            warn!(target: "fed.catalog", source_id, error = %e, "schema fetch failed, skipping");
                        }
                    }
                }
            })
            .await;
    }

    /// Look up the loaded schema for a source, if any.
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<SourceSchema> {
        self.schemas
            .read()
            .expect("schema catalog lock poisoned")
            .get(source_id)
            .cloned()
    }

    /// Render every loaded schema into a compact descriptor set for the LLM.
    #[must_use]
    pub fn build_sources_for_llm(&self) -> Vec<SourceDescriptor> {
        let guard = self.schemas.read().expect("schema catalog lock poisoned");
        let mut ids: Vec<&String> = guard.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let schema = &guard[id];
                SourceDescriptor {
                    mcp_id: schema.mcp_id.clone(),
                    db_type: schema.db_type,
                    tools: schema.db_type.allowed_tools().iter().map(|t| t.as_path()).collect(),
                    entities: schema
                        .entities
                        .iter()
                        .map(|e| EntityDescriptor {
                            name: e.name.clone(),
                            semantic_tags: e.semantic_tags.clone(),
                            default_id_field: e.default_id_field.clone(),
                            fields: e
                                .fields
                                .iter()
                                .map(|f| FieldDescriptor {
                                    name: f.name.clone(),
                                    field_type: f.field_type.clone(),
                                    semantic_tags: f.semantic_tags.clone(),
                                })
                                .collect(),
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// Heuristic lexical scorer over loaded schemas, used only by the
    /// planner's deterministic fallback.
    #[must_use]
    pub fn discover_candidates(&self, nl_query: &str) -> Vec<Candidate> {
        let lower = nl_query.to_lowercase();
        let tokens: Vec<&str> = lower.split_whitespace().collect();
        let guard = self.schemas.read().expect("schema catalog lock poisoned");

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut ids: Vec<&String> = guard.keys().collect();
        ids.sort();
        for id in ids {
            let schema = &guard[id];
            for entity in &schema.entities {
                let mut score = 0.0;
                for tok in &tokens {
                    if tok.contains("customer") && entity.semantic_tags.iter().any(|t| t == "entity:customer") {
                        score += 5.0;
                    }
                    if tok.contains("email") && entity.fields.iter().any(|f| f.semantic_tags.iter().any(|t| t == "email")) {
                        score += 3.0;
                    }
                    if (tok.contains("similar") || tok.contains("embedding"))
                        && entity.fields.iter().any(|f| f.semantic_tags.iter().any(|t| t == "embedding"))
                    {
                        score += 3.0;
                    }
                    if (tok.contains("referral") || tok.contains("referred"))
                        && entity.semantic_tags.iter().any(|t| t == "referral")
                    {
                        score += 3.0;
                    }
                }
                if score > 0.0 {
                    candidates.push(Candidate {
                        mcp_id: schema.mcp_id.clone(),
                        db_type: schema.db_type,
                        entity_name: entity.name.clone(),
                        entity_tags: entity.semantic_tags.clone(),
                        score,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    /// Debug field search backing `GET /api/v1/schema/search`.
    #[must_use]
    pub fn search_fields(&self, query: &str, top_k: usize) -> Vec<FieldHit> {
        let needle = query.to_lowercase();
        let guard = self.schemas.read().expect("schema catalog lock poisoned");
        let mut hits = Vec::new();
        let mut ids: Vec<&String> = guard.keys().collect();
        ids.sort();
        for id in ids {
            let schema = &guard[id];
            for entity in &schema.entities {
                for field in &entity.fields {
                    let mut score = 0.0;
                    if field.name.to_lowercase().contains(&needle) {
                        score += 1.0;
                    }
                    if entity.name.to_lowercase().contains(&needle) {
                        score += 0.5;
                    }
                    if score > 0.0 {
                        hits.push(FieldHit {
                            id: format!("{}.{}.{}", schema.mcp_id, entity.name, field.name),
                            mcp: schema.mcp_id.clone(),
                            parent: entity.name.clone(),
                            field: field.name.clone(),
                            score,
                        });
                    }
                }
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}

/// Validate that a fetched schema's `db_type` is internally consistent
/// (always true given strongly-typed deserialization; kept as a named check
/// so P5 has an explicit call site to test against).
pub fn validate_schema_fidelity(schema: &SourceSchema, expected_db_type: DbType) -> Result<(), FedError> {
    if schema.db_type == expected_db_type {
        Ok(())
    } else {
        Err(FedError::new(
            ErrorCode::ValidationError,
            format!("schema db_type mismatch for {}", schema.mcp_id),
        )
        .with_context("mcp_id", schema.mcp_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_backend_mock::{MockToolDispatcher, GRAPH_REFERRALS, ORDERS_MONGO, SQL_CUSTOMERS, VECTOR_CUSTOMERS};
    use fed_registry::{Capability, Manifest};

    fn registry_with_defaults() -> Arc<SourceRegistry> {
        let registry = Arc::new(SourceRegistry::new());
        registry.register(Manifest::new(SQL_CUSTOMERS, "mock://sql", [Capability::QuerySql]));
        registry.register(Manifest::new(ORDERS_MONGO, "mock://orders", [Capability::QueryDocument]));
        registry.register(Manifest::new(GRAPH_REFERRALS, "mock://graph", [Capability::QueryGraph]));
        registry.register(Manifest::new(VECTOR_CUSTOMERS, "mock://vector", [Capability::QueryVector]));
        registry
    }

    fn catalog_with_defaults() -> SchemaCatalog {
        let registry = registry_with_defaults();
        let dispatcher: Arc<dyn ToolDispatcher> = Arc::new(MockToolDispatcher::new());
        SchemaCatalog::new(registry, dispatcher)
    }

    #[tokio::test]
    async fn ensure_loaded_populates_every_registered_source() {
        let catalog = catalog_with_defaults();
        catalog.ensure_loaded().await;
        assert!(catalog.get(SQL_CUSTOMERS).is_some());
        assert!(catalog.get(VECTOR_CUSTOMERS).is_some());
        assert_eq!(catalog.get(SQL_CUSTOMERS).unwrap().db_type, DbType::Sql);
    }

    #[tokio::test]
    async fn ensure_loaded_is_idempotent_and_concurrency_safe() {
        let catalog = Arc::new(catalog_with_defaults());
        let a = catalog.clone();
        let b = catalog.clone();
        tokio::join!(a.ensure_loaded(), b.ensure_loaded());
        assert_eq!(catalog.build_sources_for_llm().len(), 4);
    }

    #[tokio::test]
    async fn build_sources_for_llm_is_sorted_by_mcp_id() {
        let catalog = catalog_with_defaults();
        catalog.ensure_loaded().await;
        let sources = catalog.build_sources_for_llm();
        let ids: Vec<&str> = sources.iter().map(|s| s.mcp_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn discover_candidates_scores_customer_query_highest_for_sql_entity() {
        let catalog = catalog_with_defaults();
        catalog.ensure_loaded().await;
        let candidates = catalog.discover_candidates("find the email for this customer");
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].mcp_id, SQL_CUSTOMERS);
    }

    #[tokio::test]
    async fn discover_candidates_matches_embedding_terms_to_vector_source() {
        let catalog = catalog_with_defaults();
        catalog.ensure_loaded().await;
        let candidates = catalog.discover_candidates("find customers similar to this one");
        assert!(candidates.iter().any(|c| c.mcp_id == VECTOR_CUSTOMERS));
    }

    #[tokio::test]
    async fn search_fields_finds_email_field_on_customers() {
        let catalog = catalog_with_defaults();
        catalog.ensure_loaded().await;
        let hits = catalog.search_fields("email", 5);
        assert!(hits.iter().any(|h| h.field == "email" && h.mcp == SQL_CUSTOMERS));
    }

    #[test]
    fn validate_schema_fidelity_rejects_mismatch() {
        let schema = SourceSchema {
            mcp_id: "x".into(),
            db_type: DbType::Sql,
            entities: vec![],
        };
        assert!(validate_schema_fidelity(&schema, DbType::Sql).is_ok());
        assert!(validate_schema_fidelity(&schema, DbType::Graph).is_err());
    }
}
