use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiResult;
use crate::analytics::{AnalyticsService, LinkOverview};
use crate::auth::{Caller, TokenService};
use crate::error::Error;
use crate::links::LinkService;
use crate::models::{CreateUrlRequest, ShortLink, ShortLinkSummary};
use crate::permission::Permission;
use crate::users::UserService;

pub struct AppState {
    pub links: Arc<LinkService>,
    pub users: Arc<UserService>,
    pub analytics: Arc<AnalyticsService>,
    pub tokens: TokenService,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

/// Create a new short link
pub async fn create_url(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<CreateUrlRequest>,
) -> ApiResult<(StatusCode, Json<ShortLink>)> {
    let link = state
        .links
        .create(&caller, &payload.original_url, payload.custom_path.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// List the caller's own links
pub async fn list_urls(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<ShortLinkSummary>>> {
    Ok(Json(state.links.list_owned(&caller).await?))
}

/// List every link; needs view-any or delete-any
pub async fn list_all_urls(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<ShortLinkSummary>>> {
    let held = caller.permissions();
    if !held.has(Permission::VIEW_ANY_STATS) && !held.has(Permission::DELETE_ANY) {
        return Err(Error::NoPermission.into());
    }
    Ok(Json(state.links.list_all().await?))
}

/// Look a link up by its short path
pub async fn get_url_by_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Json<ShortLink>> {
    Ok(Json(state.links.resolve(&path).await?))
}

pub async fn delete_url_by_path(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(path): Path<String>,
) -> ApiResult<StatusCode> {
    state.links.delete_by_path(&caller, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.links.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Click overview for one link
pub async fn url_stats(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<LinkOverview>> {
    let overview = state
        .analytics
        .overview(&caller, id, query.from, query.to)
        .await?;
    Ok(Json(overview))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
