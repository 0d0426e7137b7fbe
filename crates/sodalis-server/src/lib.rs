use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use sodalis_core::{
    CacheHooks, EmbeddingStore, MemEmbeds, MemGraph, PymkConfig, PymkService, SocialGraph,
    SodalisError, Suggestion,
};

pub mod metrics;

use metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    graph: Arc<dyn SocialGraph>,
    embeds: Arc<dyn EmbeddingStore>,
    pymk: Arc<PymkService>,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(cfg: PymkConfig) -> Self {
        let graph: Arc<dyn SocialGraph> = Arc::new(MemGraph::new());
        let embeds: Arc<dyn EmbeddingStore> = Arc::new(MemEmbeds::new());
        let metrics = Arc::new(Metrics::new());
        let hooks = CacheHooks {
            on_hit: Some(Box::new({
                let m = metrics.clone();
                move || m.cache_hit()
            })),
            on_miss: Some(Box::new({
                let m = metrics.clone();
                move || m.cache_miss()
            })),
            on_evict: Some(Box::new({
                let m = metrics.clone();
                move || m.cache_eviction()
            })),
        };
        let pymk = Arc::new(PymkService::with_cache_hooks(
            graph.clone(),
            embeds.clone(),
            cfg,
            hooks,
        ));
        Self { graph, embeds, pymk, metrics }
    }
}

#[derive(Deserialize)]
struct EdgeInput {
    src: u64,
    dst: u64,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Deserialize)]
struct UserParams {
    user_id: u64,
}

#[derive(Deserialize)]
struct MutualsParams {
    u: u64,
    v: u64,
}

#[derive(Deserialize)]
struct EmbeddingInput {
    user_id: u64,
    vector: Vec<f32>,
}

#[derive(Deserialize)]
struct PymkParams {
    user_id: u64,
    k: Option<String>,
    exclude: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/healthz", get(health))
        .route("/follow", post(post_follow))
        .route("/unfollow", post(post_unfollow))
        .route("/following", get(get_following))
        .route("/followers", get(get_followers))
        .route("/mutuals", get(get_mutuals))
        .route("/embedding", put(put_embedding))
        .route("/pymk", get(get_pymk))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(metrics, metrics::track))
        .with_state(state)
}

pub async fn serve() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = pymk_config_from_env();
    let state = AppState::new(cfg);
    let app = router(state);

    let addr: SocketAddr = std::env::var("ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn pymk_config_from_env() -> PymkConfig {
    let max_expand = std::env::var("SODALIS_MAX_EXPAND")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(200);
    let max_candidates = std::env::var("SODALIS_MAX_CANDIDATES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(20_000);
    let w_common = std::env::var("SODALIS_W_COMMON")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0);
    let w_jaccard = std::env::var("SODALIS_W_JACCARD")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.6);
    let w_aa = std::env::var("SODALIS_W_AA")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.8);
    let w_cosine = std::env::var("SODALIS_W_COSINE")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0);
    let cache_size = std::env::var("SODALIS_CACHE_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000);
    let cache_ttl_secs = std::env::var("SODALIS_CACHE_TTL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(120);

    PymkConfig {
        max_expand_per_neighbor: max_expand,
        max_candidates,
        w_common,
        w_jaccard,
        w_aa,
        w_cosine,
        cache_size,
        cache_ttl: Duration::from_secs(cache_ttl_secs),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn post_follow(
    State(state): State<AppState>,
    input: Result<Json<EdgeInput>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(input) = input.map_err(ApiError::bad_request)?;
    let ok = state.graph.follow(input.src, input.dst);
    if ok {
        state.metrics.record_follow();
    }
    Ok(Json(OkResponse { ok }))
}

async fn post_unfollow(
    State(state): State<AppState>,
    input: Result<Json<EdgeInput>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(input) = input.map_err(ApiError::bad_request)?;
    let ok = state.graph.unfollow(input.src, input.dst);
    if ok {
        state.metrics.record_unfollow();
    }
    Ok(Json(OkResponse { ok }))
}

async fn get_following(
    State(state): State<AppState>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Result<Json<Vec<u64>>, ApiError> {
    let Query(params) = params.map_err(ApiError::bad_request)?;
    Ok(Json(state.graph.following(params.user_id)))
}

async fn get_followers(
    State(state): State<AppState>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Result<Json<Vec<u64>>, ApiError> {
    let Query(params) = params.map_err(ApiError::bad_request)?;
    Ok(Json(state.graph.followers(params.user_id)))
}

async fn get_mutuals(
    State(state): State<AppState>,
    params: Result<Query<MutualsParams>, QueryRejection>,
) -> Result<Json<Vec<u64>>, ApiError> {
    let Query(params) = params.map_err(ApiError::bad_request)?;
    let mut a: HashSet<u64> = state.graph.following(params.u).into_iter().collect();
    let mut b: HashSet<u64> = state.graph.following(params.v).into_iter().collect();
    // iterate the smaller set
    if a.len() > b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    let res: Vec<u64> = a.into_iter().filter(|x| b.contains(x)).collect();
    Ok(Json(res))
}

async fn put_embedding(
    State(state): State<AppState>,
    input: Result<Json<EmbeddingInput>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(input) = input.map_err(ApiError::bad_request)?;
    state.embeds.put(input.user_id, input.vector)?;
    Ok(Json(OkResponse { ok: true }))
}

async fn get_pymk(
    State(state): State<AppState>,
    params: Result<Query<PymkParams>, QueryRejection>,
) -> Result<Json<Vec<Suggestion>>, ApiError> {
    let Query(params) = params.map_err(ApiError::bad_request)?;
    // An unparseable or non-positive k falls back to the default rather
    // than failing the request.
    let k = params
        .k
        .as_deref()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let exclude: HashSet<u64> = params
        .exclude
        .as_deref()
        .map(|s| s.split(',').filter_map(|t| t.trim().parse::<u64>().ok()).collect())
        .unwrap_or_default();
    Ok(Json(state.pymk.recommend(params.user_id, k, &exclude)))
}

async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
}

impl ApiError {
    fn bad_request(err: impl std::fmt::Display) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<SodalisError> for ApiError {
    fn from(err: SodalisError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    }
}
