// SPDX-License-Identifier: MIT OR Apache-2.0
use anyhow::{Context, Result};
use clap::Parser;
use fed_backend_mock::{MockToolDispatcher, GRAPH_REFERRALS, ORDERS_MONGO, SQL_CUSTOMERS, VECTOR_CUSTOMERS};
use fed_catalog::SchemaCatalog;
use fed_config::{AppConfig, Capability as ConfigCapability, LlmMode};
use fed_daemon::{build_app, AppState};
use fed_dispatcher::{HttpToolDispatcher, ToolDispatcher};
use fed_executor::ExecutionEngine;
use fed_orchestrator::Orchestrator;
use fed_planner::{HeuristicOnlyLlmClient, LlmClient, MockLlmClient, Planner};
use fed_registry::{Capability as RegistryCapability, Manifest, SourceRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fed-daemon", version, about = "Polyglot query federator daemon")]
struct Args {
    /// Path to a TOML config file. When omitted, defaults are used and the
    /// built-in mock backend topology is registered automatically.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, warnings) = match &args.config {
        Some(path) => AppConfig::load_from_file(path).with_context(|| format!("load config {}", path.display()))?,
        None => (AppConfig::default(), Vec::new()),
    };

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_level)).init();
    for warning in &warnings {
        tracing::warn!(target: "fed.config", %warning, "config warning");
    }

    let registry = Arc::new(build_registry(&config));
    let dispatcher: Arc<dyn ToolDispatcher> = if config.sources.is_empty() {
        info!(target: "fed.daemon", "no sources configured, registering built-in mock topology");
        Arc::new(MockToolDispatcher::new())
    } else {
        Arc::new(HttpToolDispatcher::with_timeouts(registry.clone(), config.default_tool_timeout, config.schema_timeout))
    };

    let catalog = Arc::new(SchemaCatalog::new(registry.clone(), dispatcher.clone()));
    catalog.ensure_loaded().await;

    let llm: Arc<dyn LlmClient> = match config.llm_mode {
        LlmMode::Mock => Arc::new(MockLlmClient::default()),
        LlmMode::Heuristic => Arc::new(HeuristicOnlyLlmClient),
    };
    let planner = Planner::new(catalog.clone(), llm);
    let executor = ExecutionEngine::new(dispatcher);
    let orchestrator = Arc::new(Orchestrator::new(catalog.clone(), planner, executor));

    let state = Arc::new(AppState { orchestrator, registry, catalog });
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await.with_context(|| format!("bind {}", config.bind))?;
    info!(target: "fed.daemon", bind = %config.bind, llm_mode = ?config.llm_mode, "fed-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

fn build_registry(config: &AppConfig) -> SourceRegistry {
    let registry = SourceRegistry::new();
    if config.sources.is_empty() {
        registry.register(Manifest::new(SQL_CUSTOMERS, "mock://sql", [RegistryCapability::QuerySql]));
        registry.register(Manifest::new(ORDERS_MONGO, "mock://orders", [RegistryCapability::QueryDocument]));
        registry.register(Manifest::new(GRAPH_REFERRALS, "mock://graph", [RegistryCapability::QueryGraph]));
        registry.register(Manifest::new(VECTOR_CUSTOMERS, "mock://vector", [RegistryCapability::QueryVector]));
    } else {
        for source in &config.sources {
            let capabilities = source.capabilities.iter().copied().map(map_capability);
            registry.register(Manifest::new(source.id.clone(), source.host.clone(), capabilities));
        }
    }
    registry
}

fn map_capability(capability: ConfigCapability) -> RegistryCapability {
    match capability {
        ConfigCapability::QuerySql => RegistryCapability::QuerySql,
        ConfigCapability::QueryDocument => RegistryCapability::QueryDocument,
        ConfigCapability::QueryGraph => RegistryCapability::QueryGraph,
        ConfigCapability::QueryVector => RegistryCapability::QueryVector,
    }
}
