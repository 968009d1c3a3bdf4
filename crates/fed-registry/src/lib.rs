// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Source Registry (C1): the set of known backend manifests.
//!
//! Registration happens once during startup; after that the registry is read
//! concurrently from many request-handling tasks, so it is backed by a
//! `RwLock` rather than requiring external synchronization from callers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// A coarse label on a source declaring which kind of tool it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    #[serde(rename = "query.sql")]
    QuerySql,
    #[serde(rename = "query.document")]
    QueryDocument,
    #[serde(rename = "query.graph")]
    QueryGraph,
    #[serde(rename = "query.vector")]
    QueryVector,
}

/// A registered backend: id, host, and declared capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub host: String,
    pub capabilities: BTreeSet<Capability>,
}

impl Manifest {
    #[must_use]
    pub fn new(id: impl Into<String>, host: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// The registry of known backend manifests, keyed by source id.
#[derive(Default)]
pub struct SourceRegistry {
    manifests: RwLock<HashMap<String, Manifest>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest under its id, replacing any previous entry.
    pub fn register(&self, manifest: Manifest) {
        self.manifests
            .write()
            .expect("source registry lock poisoned")
            .insert(manifest.id.clone(), manifest);
    }

    /// Look up a manifest by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Manifest> {
        self.manifests
            .read()
            .expect("source registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Return a sorted list of registered source ids.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .manifests
            .read()
            .expect("source registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Return every registered manifest, sorted by id.
    #[must_use]
    pub fn all(&self) -> Vec<Manifest> {
        let guard = self.manifests.read().expect("source registry lock poisoned");
        let mut all: Vec<Manifest> = guard.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// `true` if a source with the given id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.manifests
            .read()
            .expect("source registry lock poisoned")
            .contains_key(id)
    }

    /// `true` if no sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests
            .read()
            .expect("source registry lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_manifest(id: &str) -> Manifest {
        Manifest::new(id, "http://localhost:8001", [Capability::QuerySql])
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = SourceRegistry::new();
        registry.register(sql_manifest("sql_customers"));
        let found = registry.get("sql_customers").unwrap();
        assert_eq!(found.host, "http://localhost:8001");
        assert!(found.has_capability(Capability::QuerySql));
    }

    #[test]
    fn register_replaces_existing_entry_by_id() {
        let registry = SourceRegistry::new();
        registry.register(sql_manifest("sql_customers"));
        registry.register(Manifest::new(
            "sql_customers",
            "http://localhost:9999",
            [Capability::QuerySql],
        ));
        assert_eq!(registry.get("sql_customers").unwrap().host, "http://localhost:9999");
        assert_eq!(registry.ids().len(), 1);
    }

    #[test]
    fn ids_are_sorted() {
        let registry = SourceRegistry::new();
        registry.register(sql_manifest("zeta"));
        registry.register(sql_manifest("alpha"));
        assert_eq!(registry.ids(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn unknown_id_returns_none() {
        let registry = SourceRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn empty_registry_reports_empty() {
        let registry = SourceRegistry::new();
        assert!(registry.is_empty());
        registry.register(sql_manifest("s1"));
        assert!(!registry.is_empty());
    }
}
