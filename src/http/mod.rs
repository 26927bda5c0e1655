use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::cache::ResponseCache;
use crate::error::Error as CoreError;
use crate::model::Filters;
use crate::query::QueryEngine;
use crate::store::Store;

/// Shared state handed to every handler, per spec.md §6 ("server process
/// holds one `Store`, one cache, shared across requests").
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub cache: Arc<ResponseCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/repo", get(repo))
        .route("/api/repo/history", get(history))
        .route("/api/rank", get(rank_badge))
        .route("/:owner/:repo", get(owner_repo_redirect))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps core [`CoreError`]s onto HTTP status codes, per spec.md §7:
/// `InvalidArgument` -> 400, `NotFound` -> 404, everything else -> 500.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            CoreError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CoreError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            other => {
                error!(error = %other, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct LeaderboardParams {
    metric: Option<String>,
    page: Option<i64>,
    q: Option<String>,
    #[serde(default = "default_true")]
    in_description: bool,
    language: Option<String>,
    topic: Option<String>,
}

impl LeaderboardParams {
    fn filters(&self) -> Filters {
        Filters {
            q: self.q.clone(),
            in_description: self.in_description,
            language: self.language.clone(),
            topic: self.topic.clone(),
        }
    }

    fn cache_key(&self, metric: &str, page: i64) -> String {
        format!(
            "lb:{metric}:{page}:{}:{}:{}:{}",
            self.q.as_deref().unwrap_or(""),
            self.in_description,
            self.language.as_deref().unwrap_or(""),
            self.topic.as_deref().unwrap_or(""),
        )
    }
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let metric = params.metric.clone().unwrap_or_else(|| "stars".to_string());
    let page = params.page.unwrap_or(1);
    let key = params.cache_key(&metric, page);

    if let Some(cached) = state.cache.get(&key) {
        return Ok(Json(cached));
    }

    let engine = QueryEngine::new(&state.store);
    let filters = params.filters();
    let items = engine.leaderboard(&metric, page, &filters)?;
    let total = engine.count_leaderboard(&filters)?;
    let total_pages = QueryEngine::total_pages(total);

    let body = json!({
        "items": items,
        "page": page,
        "totalPages": total_pages,
        "total": total,
    });
    state.cache.set(key, body.clone());
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct RepoParams {
    name: String,
}

async fn repo(
    State(state): State<AppState>,
    Query(params): Query<RepoParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = format!("repo:{}", params.name);
    if let Some(cached) = state.cache.get(&key) {
        return Ok(Json(cached));
    }

    let engine = QueryEngine::new(&state.store);
    let view = engine
        .get_repo_latest(&params.name)?
        .ok_or(CoreError::NotFound("repo"))?;

    let body = json!(view);
    state.cache.set(key, body.clone());
    Ok(Json(body))
}

/// History segments are capped at a fixed ceiling (spec.md §6); there is
/// no caller-supplied `limit` param.
const MAX_HISTORY_SEGMENTS: i64 = 2920;

#[derive(Debug, Deserialize)]
struct HistoryParams {
    name: String,
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let engine = QueryEngine::new(&state.store);
    let segments = engine.history_segments(&params.name, MAX_HISTORY_SEGMENTS)?;
    Ok(Json(json!({
        "nameWithOwner": params.name,
        "segments": segments,
    })))
}

#[derive(Debug, Deserialize)]
struct RankParams {
    name: String,
}

/// Shields.io-compatible badge JSON (spec.md §6): unlike every other
/// route, an absent repo is not a 404 — it's a 200 with a synthesized
/// "repo not found" badge body.
async fn rank_badge(
    State(state): State<AppState>,
    Query(params): Query<RankParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let engine = QueryEngine::new(&state.store);
    let rank = engine.get_global_rank(&params.name)?;

    let body = match rank {
        Some(rank) => json!({
            "schemaVersion": 1,
            "label": "global rank",
            "message": format!("#{rank}"),
            "color": rank_color(rank),
            "cacheSeconds": 3600,
        }),
        None => json!({
            "schemaVersion": 1,
            "label": "rank",
            "message": "repo not found",
            "color": "blue",
        }),
    };

    Ok(Json(body))
}

fn rank_color(rank: i64) -> &'static str {
    if rank <= 100 {
        "brightgreen"
    } else if rank <= 1000 {
        "orange"
    } else {
        "blue"
    }
}

async fn owner_repo_redirect(
    State(state): State<AppState>,
    AxumPath((owner, repo)): AxumPath<(String, String)>,
) -> Result<Redirect, ApiError> {
    let name = format!("{owner}/{repo}");
    let engine = QueryEngine::new(&state.store);
    let rank = engine
        .get_global_rank(&name)?
        .ok_or(CoreError::NotFound("repo"))?;

    let page = (rank - 1) / 100 + 1;
    let encoded = urlencoding::encode(&name);
    let target =
        format!("/?page={page}&metric=stars&view=table&highlight={encoded}&open={encoded}");
    Ok(Redirect::temporary(&target))
}
