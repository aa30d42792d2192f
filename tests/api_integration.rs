//! Management API integration tests
//!
//! Drive the full axum router (auth middleware included) with
//! `tower::ServiceExt::oneshot` against an in-memory SQLite store.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use onelink::analytics::{AnalyticsService, ClickIngestor};
use onelink::api::{create_api_router, AppState};
use onelink::auth::{Authenticator, TokenService};
use onelink::links::{LinkService, PathAllocator};
use onelink::permission::{ROLE_ADMIN, ROLE_PRIVILEGED};
use onelink::storage::{SqliteStorage, Storage};
use onelink::users::UserService;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

struct TestApp {
    router: Router,
    storage: Arc<dyn Storage>,
}

impl TestApp {
    async fn new() -> Self {
        Self::build(Duration::from_secs(600), Duration::from_secs(5)).await
    }

    async fn with_chat_link_ttl(chat_link_ttl: Duration) -> Self {
        Self::build(chat_link_ttl, Duration::from_secs(5)).await
    }

    async fn build(chat_link_ttl: Duration, request_timeout: Duration) -> Self {
        let storage = create_test_storage().await;
        let tokens = TokenService::new("test-secret-for-integration-tests", 3600);
        let users = Arc::new(
            UserService::new(Arc::clone(&storage), tokens.clone())
                .with_chat_link_ttl(chat_link_ttl),
        );
        users.ensure_anonymous().await.unwrap();

        let state = Arc::new(AppState {
            links: Arc::new(LinkService::new(
                Arc::clone(&storage),
                PathAllocator::new(6),
            )),
            users,
            analytics: Arc::new(AnalyticsService::new(Arc::clone(&storage))),
            tokens: tokens.clone(),
        });
        let authenticator = Arc::new(Authenticator::new(tokens, Arc::clone(&storage)));
        let router = create_api_router(state, authenticator, request_timeout);

        Self { router, storage }
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Register and log in, returning the session token and user id
    async fn sign_up(&self, username: &str) -> (String, i64) {
        let credentials = json!({ "username": username, "password": "correct-horse" });
        let response = self
            .send("POST", "/api/auth/register", None, Some(credentials.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = self
            .send("POST", "/api/auth/login", None, Some(credentials))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        (
            json["token"].as_str().unwrap().to_string(),
            json["user"]["id"].as_i64().unwrap(),
        )
    }

    /// Sign up and promote to admin
    async fn sign_up_admin(&self, username: &str) -> String {
        let (token, id) = self.sign_up(username).await;
        self.storage.update_permissions(id, ROLE_ADMIN).await.unwrap();
        token
    }

    /// Issue a chat link token as `admin_token`
    async fn chat_link_token(&self, admin_token: &str, chat_id: i64) -> String {
        let response = self
            .send(
                "POST",
                "/api/auth/telegram/token",
                Some(admin_token),
                Some(json!({ "chat_id": chat_id })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["token"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new().await;
    let response = app.send("GET", "/api/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = TestApp::new().await;
    let (token, id) = app.sign_up("alice").await;

    let response = app.send("GET", "/api/me", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await;
    assert_eq!(me["id"], id);
    assert_eq!(me["username"], "alice");
    assert!(me.get("password_hash").is_none());

    // Duplicate registration
    let response = app
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "another-pass" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.send("GET", "/api/me", None, None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_sets_session_cookie() {
    let app = TestApp::new().await;
    app.sign_up("cookie_user").await;

    let response = app
        .send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "cookie_user", "password": "correct-horse" })),
        )
        .await;
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("jwt="));
    assert!(cookie.contains("HttpOnly"));

    let session = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .uri("/api/me")
        .header(header::COOKIE, session)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_expires_session_cookie() {
    let app = TestApp::new().await;
    let response = app.send("POST", "/api/auth/logout", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("jwt=;"));
    assert!(cookie.contains("Max-Age=0"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_link_management_flow() {
    let app = TestApp::new().await;
    let (token, _) = app.sign_up("bob").await;

    let response = app
        .send(
            "POST",
            "/api/urls",
            Some(&token),
            Some(json!({ "original_url": "https://example.com/page" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let path = created["short_path"].as_str().unwrap().to_string();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(path.len(), 6);

    let response = app
        .send("GET", &format!("/api/urls/by-path/{path}"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["original_url"], "https://example.com/page");

    let response = app.send("GET", "/api/urls", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["owner_username"], "bob");
    assert_eq!(listed[0]["total_clicks"], 0);

    let response = app
        .send("GET", &format!("/api/urls/{id}/stats"), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 0);

    let response = app
        .send("DELETE", &format!("/api/urls/{id}"), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .send("GET", &format!("/api/urls/by-path/{path}"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_errors_map_to_statuses() {
    let app = TestApp::new().await;
    let (token, user_id) = app.sign_up("carol").await;

    let cases = [
        (json!({ "original_url": "not-a-url" }), StatusCode::BAD_REQUEST),
        (
            json!({ "original_url": "https://example.com", "custom_path": "api/x" }),
            StatusCode::FORBIDDEN,
        ),
        (
            json!({ "original_url": "https://example.com", "custom_path": "promo" }),
            StatusCode::FORBIDDEN,
        ),
        (
            json!({ "original_url": "https://example.com", "custom_path": "@carol/promo" }),
            StatusCode::CREATED,
        ),
        (
            json!({ "original_url": "https://example.com", "custom_path": "@carol/promo" }),
            StatusCode::CONFLICT,
        ),
    ];
    for (body, expected) in cases {
        let response = app.send("POST", "/api/urls", Some(&token), Some(body.clone())).await;
        assert_eq!(response.status(), expected, "request body: {body}");
    }

    app.storage
        .update_permissions(user_id, ROLE_PRIVILEGED)
        .await
        .unwrap();
    let response = app
        .send(
            "POST",
            "/api/urls",
            Some(&token),
            Some(json!({ "original_url": "https://example.com", "custom_path": "promo" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_anonymous_create_and_foreign_stats() {
    let app = TestApp::new().await;
    let (token, _) = app.sign_up("dave").await;

    let response = app
        .send(
            "POST",
            "/api/urls",
            None,
            Some(json!({ "original_url": "https://example.com/anon" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    // dave does not own it and only has view-own
    let response = app
        .send("GET", &format!("/api/urls/{id}/stats"), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .send("DELETE", &format!("/api/urls/{id}"), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send("GET", "/api/urls/all", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send("GET", "/api/urls/99999/stats", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_user_management_requires_admin() {
    let app = TestApp::new().await;
    let (admin_token, admin_id) = app.sign_up("root_admin").await;
    let (user_token, user_id) = app.sign_up("erin").await;

    let response = app.send("GET", "/api/users", Some(&user_token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Permission changes apply to existing tokens straight away
    app.storage
        .update_permissions(admin_id, ROLE_ADMIN)
        .await
        .unwrap();

    let response = app.send("GET", "/api/users", Some(&admin_token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let users = body_json(response).await;
    assert_eq!(users.as_array().unwrap().len(), 3);

    let response = app
        .send(
            "PUT",
            &format!("/api/users/{user_id}/role"),
            Some(&admin_token),
            Some(json!({ "role": "editor" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(
            "PUT",
            &format!("/api/users/{user_id}/role"),
            Some(&admin_token),
            Some(json!({ "role": "overlord" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Editors can list every link
    let response = app.send("GET", "/api/urls/all", Some(&user_token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let anonymous = app
        .storage
        .get_user_by_username("anonymous")
        .await
        .unwrap()
        .unwrap();
    let response = app
        .send(
            "DELETE",
            &format!("/api/users/{}", anonymous.id),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send("DELETE", &format!("/api/users/{user_id}"), Some(&admin_token), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The deleted user's token no longer identifies anyone
    let response = app.send("GET", "/api/me", Some(&user_token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stats_reflect_ingested_clicks() {
    let app = TestApp::new().await;
    let (token, _) = app.sign_up("frank").await;

    let response = app
        .send(
            "POST",
            "/api/urls",
            Some(&token),
            Some(json!({ "original_url": "https://example.com" })),
        )
        .await;
    let id = body_json(response).await["id"].as_i64().unwrap();

    let (ingestor, _writer) = ClickIngestor::spawn(Arc::clone(&app.storage), 16);
    for _ in 0..3 {
        ingestor.record(id, None, Some("203.0.113.7".to_string()));
    }
    ingestor.flush().await;

    let response = app
        .send("GET", &format!("/api/urls/{id}/stats"), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["by_country"][0]["key"], "unknown");
    assert_eq!(stats["by_country"][0]["count"], 3);

    // An empty window
    let response = app
        .send(
            "GET",
            &format!("/api/urls/{id}/stats?from=0&to=86400"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(body_json(response).await["total"], 0);
}

#[tokio::test]
async fn test_chat_link_flow() {
    let app = TestApp::new().await;
    let admin_token = app.sign_up_admin("chat_admin").await;
    let (token, _) = app.sign_up("mallory").await;

    let link_token = app.chat_link_token(&admin_token, 4242).await;
    let response = app
        .send(
            "POST",
            "/api/auth/telegram/link",
            Some(&token),
            Some(json!({ "token": link_token })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["chat_id"], 4242);

    // Single use
    let response = app
        .send(
            "POST",
            "/api/auth/telegram/link",
            Some(&token),
            Some(json!({ "token": link_token })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A linked chat cannot be offered again
    let response = app
        .send(
            "POST",
            "/api/auth/telegram/token",
            Some(&admin_token),
            Some(json!({ "chat_id": 4242 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send("DELETE", "/api/auth/telegram/link", Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["chat_id"].is_null());
}

#[tokio::test]
async fn test_chat_link_token_expires() {
    let app = TestApp::with_chat_link_ttl(Duration::from_millis(50)).await;
    let admin_token = app.sign_up_admin("chat_admin").await;
    let (token, id) = app.sign_up("niaj").await;

    let link_token = app.chat_link_token(&admin_token, 99).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let response = app
        .send(
            "POST",
            "/api/auth/telegram/link",
            Some(&token),
            Some(json!({ "token": link_token })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let user = app.storage.get_user_by_id(id).await.unwrap().unwrap();
    assert_eq!(user.chat_id, None);
}

#[tokio::test]
async fn test_chat_link_requires_login_and_manager() {
    let app = TestApp::new().await;
    let admin_token = app.sign_up_admin("chat_admin").await;
    let (token, _) = app.sign_up("olivia").await;

    // Regular users cannot issue tokens
    let response = app
        .send(
            "POST",
            "/api/auth/telegram/token",
            Some(&token),
            Some(json!({ "chat_id": 7 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Anonymous callers are turned away without consuming the token
    let link_token = app.chat_link_token(&admin_token, 7).await;
    let response = app
        .send(
            "POST",
            "/api/auth/telegram/link",
            None,
            Some(json!({ "token": link_token })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(
            "POST",
            "/api/auth/telegram/link",
            Some(&token),
            Some(json!({ "token": link_token })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(
            "POST",
            "/api/auth/telegram/link",
            Some(&token),
            Some(json!({ "token": "made-up" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stalled_request_times_out() {
    let app = TestApp::build(Duration::from_secs(600), Duration::from_millis(100)).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Promise a body that never arrives
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"POST /api/auth/login HTTP/1.1\r\nHost: localhost\r\n\
              Content-Type: application/json\r\nContent-Length: 64\r\n\r\n{",
        )
        .await
        .unwrap();

    let mut buf = vec![0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let head = String::from_utf8_lossy(&buf[..n]);
    assert!(head.starts_with("HTTP/1.1 408"), "unexpected response: {head}");
}
