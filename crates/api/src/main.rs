mod cache;
mod config;
mod handlers;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use cache::AnalyticsCache;
use config::ServerConfig;
use extract::OllamaClient;
use graph::{GraphExport, KnowledgeGraph};
use pipeline::IngestionPipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub graph: Arc<Mutex<KnowledgeGraph>>,
    pub pipeline: IngestionPipeline,
    pub cache: AnalyticsCache,
    pub graph_path: Option<PathBuf>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ingest", post(handlers::ingest))
        .route("/entities/merge", post(handlers::merge_entities))
        .route(
            "/entities/:name_or_id",
            get(handlers::get_entity).delete(handlers::purge_entity),
        )
        .route("/path", get(handlers::find_path))
        .route("/subgraph", post(handlers::subgraph))
        .route("/centrality", get(handlers::centrality))
        .route("/communities", get(handlers::communities))
        .route("/stats", get(handlers::stats))
        .route("/export", get(handlers::export))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn load_graph(config: &ServerConfig) -> anyhow::Result<KnowledgeGraph> {
    let resolver = config.pipeline.resolver.clone();
    match &config.graph_path {
        Some(path) if path.exists() => {
            let export = GraphExport::load(path)
                .await
                .with_context(|| format!("Failed to load graph from {}", path.display()))?;
            let graph = KnowledgeGraph::from_export(export, resolver)
                .with_context(|| format!("Graph file {} is inconsistent", path.display()))?;
            info!(
                path = %path.display(),
                entities = graph.store().entity_count(),
                relationships = graph.store().relationship_count(),
                "Loaded graph"
            );
            Ok(graph)
        }
        _ => Ok(KnowledgeGraph::new("knowledge-graph", resolver)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    if config.json_logs {
        tracing_subscriber::fmt().json().init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let graph = Arc::new(Mutex::new(load_graph(&config).await?));

    let client = OllamaClient::with_timeout(
        config.ollama_url.clone(),
        config.ollama_model.clone(),
        config.pipeline.request_timeout(),
    );
    let pipeline = IngestionPipeline::new(graph.clone(), Arc::new(client), config.pipeline.clone());

    let cache_entries = if config.cache.enabled { config.cache.max_entries } else { 0 };
    let state = Arc::new(AppState {
        graph,
        pipeline,
        cache: AnalyticsCache::new(cache_entries),
        graph_path: config.graph_path.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!(
        addr = %config.bind_addr,
        mode = ?config.pipeline.mode,
        model = %config.ollama_model,
        "Server listening"
    );

    axum::serve(listener, app(state)).await.context("Server error")?;
    Ok(())
}
