use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use extract::ChunkInput;
use graph::{Entity, EntityId, GraphError, GraphExport, KnowledgeGraph};
use pipeline::{PipelineError, RunSummary};
use query::{CentralityAlgorithm, EntityDetails, QueryEngine, QueryError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::AppState;
use crate::cache::CacheStats;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    summary: Option<Box<RunSummary>>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            summary: None,
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "summary": self.summary });
        (self.status, Json(body)).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::UnknownEntity(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        let status = match &err {
            GraphError::UnknownEntity(_) => StatusCode::NOT_FOUND,
            GraphError::TypeMismatch { .. } | GraphError::SelfMerge(_) => StatusCode::CONFLICT,
            GraphError::DanglingReference { .. } | GraphError::InvalidConfidence(_) => StatusCode::BAD_REQUEST,
            GraphError::Io(_) | GraphError::Serialization(_) => return Self::internal(err),
        };
        Self::new(status, err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let summary = Box::new(err.summary().clone());
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: err.to_string(),
            summary: Some(summary),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    graph: String,
    revision: u64,
    entities: usize,
    relationships: usize,
    cache: CacheStats,
}

#[derive(Deserialize)]
pub struct IngestRequest {
    chunks: Vec<ChunkInput>,
    /// Raw extractor responses, one per chunk. Skips the extractor when present.
    #[serde(default)]
    extractions: Option<Vec<Value>>,
}

#[derive(Deserialize)]
pub struct MergeRequest {
    keep: String,
    absorb: String,
}

#[derive(Deserialize)]
pub struct SubgraphRequest {
    entities: Vec<String>,
}

#[derive(Deserialize)]
pub struct PathQuery {
    from: String,
    to: String,
}

#[derive(Deserialize)]
pub struct CentralityQuery {
    #[serde(default = "default_top")]
    top: usize,
    #[serde(default)]
    algorithm: CentralityAlgorithm,
}

fn default_top() -> usize {
    10
}

async fn engine(state: &AppState) -> QueryEngine {
    // The lock is held only long enough to take the snapshot
    QueryEngine::new(state.graph.lock().await.snapshot())
}

fn resolve_id(graph: &KnowledgeGraph, name_or_id: &str) -> Result<EntityId, ApiError> {
    graph
        .get_entity(name_or_id)
        .map(|entity| entity.id)
        .ok_or_else(|| ApiError::from(GraphError::UnknownEntity(name_or_id.to_string())))
}

async fn persist(state: &AppState) -> Result<(), ApiError> {
    if let Some(path) = &state.graph_path {
        let export = state.graph.lock().await.to_export();
        export.save(path).await?;
    }
    Ok(())
}

/// Serve from the per-revision cache, computing and storing on a miss.
fn cached<T: Serialize>(
    state: &AppState,
    revision: u64,
    key: &str,
    compute: impl FnOnce() -> Result<T, ApiError>,
) -> ApiResult<Value> {
    if let Some(hit) = state.cache.get(revision, key) {
        debug!(key, revision, "Cache hit");
        return Ok(Json(hit));
    }
    let value = serde_json::to_value(compute()?).map_err(ApiError::internal)?;
    state.cache.set(revision, key, value.clone());
    Ok(Json(value))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let graph = state.graph.lock().await;
    Json(HealthResponse {
        status: "ok",
        graph: graph.name().to_string(),
        revision: graph.revision(),
        entities: graph.store().entity_count(),
        relationships: graph.store().relationship_count(),
        cache: state.cache.stats(),
    })
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<RunSummary> {
    let result = match req.extractions {
        Some(extractions) => {
            if extractions.len() != req.chunks.len() {
                return Err(ApiError::new(
                    StatusCode::BAD_REQUEST,
                    format!(
                        "{} extractions supplied for {} chunks",
                        extractions.len(),
                        req.chunks.len()
                    ),
                ));
            }
            state
                .pipeline
                .apply_batches(req.chunks.into_iter().zip(extractions).collect())
                .await
        }
        None => state.pipeline.run(req.chunks).await,
    };

    // Whatever was merged before an abort stays, so it is saved either way
    persist(&state).await?;

    match result {
        Ok(summary) => Ok(Json(summary)),
        Err(err) => {
            warn!(error = %err, "Ingestion aborted");
            Err(err.into())
        }
    }
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(name_or_id): Path<String>,
) -> ApiResult<EntityDetails> {
    Ok(Json(engine(&state).await.get_entity(&name_or_id)?))
}

pub async fn purge_entity(
    State(state): State<Arc<AppState>>,
    Path(name_or_id): Path<String>,
) -> ApiResult<Entity> {
    let removed = {
        let mut graph = state.graph.lock().await;
        let id = resolve_id(&graph, &name_or_id)?;
        graph.purge_entity(id)?
    };
    persist(&state).await?;
    Ok(Json(removed))
}

pub async fn merge_entities(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeRequest>,
) -> ApiResult<Entity> {
    let merged = {
        let mut graph = state.graph.lock().await;
        let keep = resolve_id(&graph, &req.keep)?;
        let absorb = resolve_id(&graph, &req.absorb)?;
        graph.merge_entities(keep, absorb)?
    };
    persist(&state).await?;
    Ok(Json(merged))
}

pub async fn find_path(State(state): State<Arc<AppState>>, Query(params): Query<PathQuery>) -> ApiResult<Value> {
    let engine = engine(&state).await;
    let key = format!("path\u{0}{}\u{0}{}", params.from, params.to);
    cached(&state, engine.revision(), &key, || {
        Ok(engine.find_path(&params.from, &params.to)?)
    })
}

pub async fn centrality(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CentralityQuery>,
) -> ApiResult<Value> {
    let engine = engine(&state).await;
    let key = format!("centrality\u{0}{}\u{0}{}", params.algorithm, params.top);
    cached(&state, engine.revision(), &key, || {
        Ok(engine.rank_by_centrality(params.top, params.algorithm))
    })
}

pub async fn subgraph(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubgraphRequest>,
) -> ApiResult<GraphExport> {
    if req.entities.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "entities must not be empty"));
    }
    Ok(Json(engine(&state).await.subgraph(&req.entities)?))
}

pub async fn communities(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let engine = engine(&state).await;
    cached(&state, engine.revision(), "communities", || Ok(engine.list_communities()))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let engine = engine(&state).await;
    cached(&state, engine.revision(), "stats", || Ok(engine.stats()))
}

pub async fn export(State(state): State<Arc<AppState>>) -> Json<GraphExport> {
    Json(state.graph.lock().await.to_export())
}
