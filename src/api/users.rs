use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiResult;
use super::handlers::{AppState, SuccessResponse};
use crate::auth::{Caller, SESSION_COOKIE};
use crate::models::User;
use crate::permission::Role;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Deserialize)]
pub struct ChatLinkIssueRequest {
    pub chat_id: i64,
}

#[derive(Serialize, Deserialize)]
pub struct ChatLinkToken {
    pub token: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state
        .users
        .register(payload.username.trim(), &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Issue a token, returned in the body and as the session cookie
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<impl IntoResponse> {
    let (token, user) = state
        .users
        .login(payload.username.trim(), &payload.password)
        .await?;

    let cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.tokens.ttl_secs()
    );
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(LoginResponse { token, user }),
    ))
}

/// Expire the session cookie. Bearer tokens stay valid until they lapse.
pub async fn logout() -> impl IntoResponse {
    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(SuccessResponse {
            message: "Logged out".to_string(),
        }),
    )
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.me(&caller).await?))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list_users(&caller).await?))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
    Json(payload): Json<RoleRequest>,
) -> ApiResult<Json<User>> {
    let role: Role = payload.role.parse()?;
    Ok(Json(state.users.set_role(&caller, id, role).await?))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.users.delete_user(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn issue_chat_link(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<ChatLinkIssueRequest>,
) -> ApiResult<(StatusCode, Json<ChatLinkToken>)> {
    let token = state
        .users
        .prepare_chat_link(&caller, payload.chat_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ChatLinkToken { token })))
}

pub async fn link_chat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<ChatLinkToken>,
) -> ApiResult<Json<User>> {
    Ok(Json(
        state
            .users
            .redeem_chat_link(&caller, &payload.token)
            .await?,
    ))
}

pub async fn unlink_chat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.unlink_own_chat(&caller).await?))
}
