//! # API Handlers
//!
//! Axum handlers over the search session. Engine errors map onto HTTP
//! status codes in [`engine_error`].

use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use esq_core::mapping::FieldInfo;
use esq_core::{AggregationSpec, Group, SearchQuery, SortSpec};
use esq_engine::history::HistoryItem;
use esq_engine::performance::{
    ExportFormat, HourlyBucket, PerformanceRecord, SimilarQuery, SlowQueryCluster,
    SlowQueryEntry, SlowQueryGroup, SlowQueryStats,
};
use esq_engine::{
    BuilderSearch, CacheStats, ConnectionConfig, ConnectionInfo, EngineError, NormalizedResult,
    PerformanceStats, QueryAnalysis, StreamOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn engine_error(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::Compile(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::UnknownConnection(_) => StatusCode::NOT_FOUND,
        EngineError::NoPreviousQuery => StatusCode::CONFLICT,
        EngineError::InvalidPage(_) => StatusCode::BAD_REQUEST,
        e if e.is_execution() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    version: &'static str,
    uptime_seconds: u64,
    connections: usize,
    cache: CacheStats,
    persistence: bool,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.session.registry().list().await.len(),
        cache: state.session.cache_stats().await,
        persistence: state.store.is_some(),
    })
}

// =============================================================================
// Connections
// =============================================================================

pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionInfo>> {
    Json(state.session.registry().list().await)
}

pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ConnectionConfig>,
) -> ApiResult<ConnectionInfo> {
    if config.id.is_empty() || config.url.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "id and url are required".into()));
    }
    let info = state
        .session
        .registry()
        .register(config)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(info))
}

pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .session
        .registry()
        .remove(&id)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn index_fields(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, String)>,
) -> ApiResult<Vec<FieldInfo>> {
    let fields = state
        .session
        .fields(&id, &index)
        .await
        .map_err(engine_error)?;
    Ok(Json(fields))
}

// =============================================================================
// Compilation
// =============================================================================

#[derive(Deserialize)]
pub struct CompileQueryRequest {
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    sort: Vec<SortSpec>,
}

pub async fn compile_query(Json(req): Json<CompileQueryRequest>) -> Json<Value> {
    let mut body = json!({ "query": esq_core::compile_query(&req.groups) });
    if let Some(sort) = esq_core::compile_sort(&req.sort) {
        body["sort"] = Value::Array(sort);
    }
    Json(body)
}

pub async fn compile_aggregations(Json(specs): Json<Vec<AggregationSpec>>) -> ApiResult<Value> {
    esq_core::compile_aggregations(&specs)
        .map(Json)
        .map_err(|e| engine_error(e.into()))
}

// =============================================================================
// Execution
// =============================================================================

#[derive(Deserialize)]
pub struct SearchRequest {
    connection_id: String,
    query: SearchQuery,
    #[serde(default = "default_true")]
    use_cache: bool,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<NormalizedResult> {
    let result = state
        .session
        .execute(&req.connection_id, &req.query, req.use_cache)
        .await
        .map_err(engine_error)?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct BuilderSearchRequest {
    connection_id: String,
    #[serde(flatten)]
    search: BuilderSearch,
    #[serde(default = "default_true")]
    use_cache: bool,
}

pub async fn search_builder(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuilderSearchRequest>,
) -> ApiResult<NormalizedResult> {
    let result = state
        .session
        .execute_builder(&req.connection_id, &req.search, req.use_cache)
        .await
        .map_err(engine_error)?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct PageRequest {
    connection_id: String,
    page: usize,
    #[serde(default)]
    page_size: Option<usize>,
}

pub async fn go_to_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PageRequest>,
) -> ApiResult<NormalizedResult> {
    let result = state
        .session
        .go_to_page(&req.connection_id, req.page, req.page_size)
        .await
        .map_err(engine_error)?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct PreloadRequest {
    connection_id: String,
}

/// Fire and forget; the response only says whether a fetch was scheduled.
pub async fn preload_next_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreloadRequest>,
) -> Json<Value> {
    let scheduled = state
        .session
        .preload_next_page(&req.connection_id)
        .await
        .is_some();
    Json(json!({ "scheduled": scheduled }))
}

#[derive(Deserialize)]
pub struct StreamRequest {
    connection_id: String,
    query: SearchQuery,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub async fn stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamRequest>,
) -> ApiResult<StreamOutcome> {
    let outcome = state
        .session
        .stream(&req.connection_id, &req.query, req.page_size, req.max_results)
        .await
        .map_err(engine_error)?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct AggregateRequest {
    connection_id: String,
    index: String,
    #[serde(default)]
    query: Option<Value>,
    aggregations: Vec<AggregationSpec>,
    #[serde(default)]
    size: Option<usize>,
}

pub async fn aggregate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AggregateRequest>,
) -> ApiResult<NormalizedResult> {
    let result = state
        .session
        .aggregate(
            &req.connection_id,
            &req.index,
            req.query.as_ref(),
            &req.aggregations,
            req.size,
        )
        .await
        .map_err(engine_error)?;
    Ok(Json(result))
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.session.cache_stats().await)
}

pub async fn reset_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.reset().await;
    StatusCode::NO_CONTENT
}

// =============================================================================
// Performance
// =============================================================================

#[derive(Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn performance_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<PerformanceRecord>> {
    Json(state.session.performance.history(params.limit).await)
}

pub async fn performance_stats(State(state): State<Arc<AppState>>) -> Json<PerformanceStats> {
    Json(state.session.performance.stats().await)
}

pub async fn performance_analyses(State(state): State<Arc<AppState>>) -> Json<Vec<QueryAnalysis>> {
    Json(state.session.performance.analyses().await)
}

#[derive(Deserialize)]
pub struct SimilarRequest {
    query: Value,
}

pub async fn similar_queries(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimilarRequest>,
) -> Json<Vec<SimilarQuery>> {
    Json(state.session.performance.find_similar(&req.query).await)
}

pub async fn clear_performance(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.performance.clear().await;
    StatusCode::NO_CONTENT
}

// =============================================================================
// Slow Query Log
// =============================================================================

pub async fn list_slow_queries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<SlowQueryEntry>> {
    Json(
        state
            .session
            .performance
            .slow_log
            .read()
            .await
            .recent(params.limit),
    )
}

pub async fn slow_query_stats(State(state): State<Arc<AppState>>) -> Json<SlowQueryStats> {
    Json(state.session.performance.slow_log.read().await.stats())
}

pub async fn slow_query_clusters(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<SlowQueryCluster>> {
    Json(state.session.performance.slow_log.read().await.clusters())
}

pub async fn slow_queries_by_index(State(state): State<Arc<AppState>>) -> Json<Vec<SlowQueryGroup>> {
    Json(state.session.performance.slow_log.read().await.by_index())
}

pub async fn slow_queries_by_connection(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<SlowQueryGroup>> {
    Json(state.session.performance.slow_log.read().await.by_connection())
}

pub async fn slow_query_hourly(State(state): State<Arc<AppState>>) -> Json<Vec<HourlyBucket>> {
    Json(
        state
            .session
            .performance
            .slow_log
            .read()
            .await
            .hourly_distribution(),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThresholdBody {
    threshold_ms: u64,
}

pub async fn slow_query_threshold(State(state): State<Arc<AppState>>) -> Json<ThresholdBody> {
    Json(ThresholdBody {
        threshold_ms: state.session.performance.threshold_ms().await,
    })
}

pub async fn set_slow_query_threshold(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ThresholdBody>,
) -> ApiResult<ThresholdBody> {
    if body.threshold_ms == 0 {
        return Err((StatusCode::BAD_REQUEST, "threshold_ms must be positive".into()));
    }
    state
        .session
        .performance
        .set_threshold_ms(body.threshold_ms)
        .await;
    Ok(Json(body))
}

#[derive(Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    format: Option<String>,
}

pub async fn export_slow_queries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let format: ExportFormat = params
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;
    let body = state
        .session
        .performance
        .slow_log
        .read()
        .await
        .export(format)
        .map_err(engine_error)?;
    let content_type = match format {
        ExportFormat::Json => "application/json",
        ExportFormat::Csv => "text/csv",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

#[derive(Deserialize)]
pub struct ClearParams {
    #[serde(default)]
    before: Option<DateTime<Utc>>,
}

/// Clears everything, or only entries at or before `?before=<rfc3339>`.
pub async fn clear_slow_queries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClearParams>,
) -> Json<Value> {
    let mut log = state.session.performance.slow_log.write().await;
    let removed = match params.before {
        Some(ts) => log.clear_before(ts),
        None => {
            let n = log.len();
            log.clear();
            n
        }
    };
    Json(json!({ "removed": removed }))
}

pub async fn remove_slow_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.session.performance.slow_log.write().await.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("slow query '{id}' not found")))
    }
}

// =============================================================================
// History
// =============================================================================

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<HistoryItem>> {
    let history = &state.session.history;
    let items = match (params.connection_id, params.q) {
        (Some(id), _) => history.for_connection(&id).await,
        (None, Some(keyword)) => history.search(&keyword).await,
        (None, None) => history.list().await,
    };
    Json(items)
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.history.clear().await;
    StatusCode::NO_CONTENT
}

pub async fn list_favorites(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryItem>> {
    Json(state.session.history.favorites().await)
}

#[derive(Deserialize)]
pub struct AddFavoriteRequest {
    history_id: String,
    #[serde(default)]
    name: Option<String>,
}

pub async fn add_favorite(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddFavoriteRequest>,
) -> ApiResult<HistoryItem> {
    let history = &state.session.history;
    let item = history.get(&req.history_id).await.ok_or((
        StatusCode::NOT_FOUND,
        format!("history item '{}' not found", req.history_id),
    ))?;
    Ok(Json(history.add_favorite(&item, req.name).await))
}

#[derive(Deserialize)]
pub struct RenameFavoriteRequest {
    name: String,
}

pub async fn rename_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RenameFavoriteRequest>,
) -> ApiResult<HistoryItem> {
    state
        .session
        .history
        .rename_favorite(&id, &req.name)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("favorite '{id}' not found")))
}

pub async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.session.history.remove_favorite(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("favorite '{id}' not found")))
    }
}
