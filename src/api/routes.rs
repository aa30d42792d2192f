use axum::{
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

use crate::auth::{auth_middleware, Authenticator};

use super::handlers::{
    create_url, delete_url, delete_url_by_path, get_url_by_path, health_check, list_all_urls,
    list_urls, url_stats, AppState,
};
use super::users::{
    delete_user, issue_chat_link, link_chat, list_users, login, logout, me, register,
    unlink_chat, update_role,
};

pub fn create_api_router(
    state: Arc<AppState>,
    authenticator: Arc<Authenticator>,
    request_timeout: Duration,
) -> Router {
    let api = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/telegram/token", post(issue_chat_link))
        .route("/auth/telegram/link", post(link_chat).delete(unlink_chat))
        .route("/me", get(me))
        .route("/urls", post(create_url).get(list_urls))
        .route("/urls/all", get(list_all_urls))
        .route(
            "/urls/by-path/{*path}",
            get(get_url_by_path).delete(delete_url_by_path),
        )
        .route("/urls/{id}", delete(delete_url))
        .route("/urls/{id}/stats", get(url_stats))
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(update_role))
        .route("/users/{id}", delete(delete_user))
        .route_layer(middleware::from_fn_with_state(authenticator, auth_middleware))
        .route("/health", get(health_check))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CorsLayer::permissive())
}
