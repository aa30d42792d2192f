//! Redirect integration tests
//!
//! These tests verify that the redirect server answers with a temporary
//! redirect, reports unknown paths, and hands every traversal to the click
//! ingestor with the client address resolved from the connection.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use onelink::analytics::ClickIngestor;
use onelink::config::IngestConfig;
use onelink::links::{LinkService, PathAllocator};
use onelink::models::ShortLink;
use onelink::permission::ROLE_PRIVILEGED;
use onelink::redirect::{self, RedirectState};
use onelink::storage::{SqliteStorage, Storage};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::{Layer, ServiceExt};

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([127, 0, 0, 1], 12345));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}

struct Harness {
    app: Router,
    storage: Arc<dyn Storage>,
    ingestor: ClickIngestor,
    link: ShortLink,
}

async fn harness(ingest_config: IngestConfig) -> Harness {
    let storage = create_test_storage().await;
    let owner = storage
        .create_user("owner", "*", ROLE_PRIVILEGED)
        .await
        .unwrap();
    let link = storage
        .create_link("docs/intro", "https://example.com/destination?q=1", owner.id)
        .await
        .unwrap();

    let (ingestor, _writer) = ClickIngestor::spawn(Arc::clone(&storage), 64);
    let state = Arc::new(RedirectState {
        links: Arc::new(LinkService::new(
            Arc::clone(&storage),
            PathAllocator::new(6),
        )),
        ingestor: ingestor.clone(),
        ingest_config,
    });
    let app = redirect::create_redirect_router(state).layer(TestConnectInfoLayer);

    Harness {
        app,
        storage,
        ingestor,
        link,
    }
}

fn direct_config() -> IngestConfig {
    IngestConfig {
        buffer_size: 64,
        trust_forwarded_for: false,
        trusted_proxies: Vec::new(),
    }
}

#[tokio::test]
async fn test_redirect_known_path() {
    let h = harness(direct_config()).await;

    let request = Request::builder()
        .uri("/docs/intro")
        .header(header::USER_AGENT, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/destination?q=1"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );

    h.ingestor.flush().await;
    assert_eq!(h.storage.count_clicks(h.link.id).await.unwrap(), 1);

    let pending = h.storage.fetch_pending_clicks(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].ip_address.as_deref(), Some("127.0.0.1"));
    let click = h.storage.get_click(pending[0].id).await.unwrap().unwrap();
    assert_eq!(click.os_name.as_deref(), Some("iPhone"));
    assert_eq!(click.browser_name.as_deref(), Some("Safari"));
}

#[tokio::test]
async fn test_redirect_unknown_path() {
    let h = harness(direct_config()).await;

    let request = Request::builder()
        .uri("/missing")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    h.ingestor.flush().await;
    assert_eq!(h.storage.count_clicks(h.link.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_forwarded_for_ignored_unless_trusted() {
    let h = harness(direct_config()).await;

    let request = Request::builder()
        .uri("/docs/intro")
        .header("x-forwarded-for", "198.51.100.4")
        .body(Body::empty())
        .unwrap();
    h.app.clone().oneshot(request).await.unwrap();
    h.ingestor.flush().await;

    let pending = h.storage.fetch_pending_clicks(10).await.unwrap();
    assert_eq!(pending[0].ip_address.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_forwarded_for_from_trusted_proxy() {
    let h = harness(IngestConfig {
        buffer_size: 64,
        trust_forwarded_for: true,
        trusted_proxies: vec!["127.0.0.0/8".parse().unwrap()],
    })
    .await;

    let request = Request::builder()
        .uri("/docs/intro")
        .header("x-forwarded-for", "198.51.100.4, 127.0.0.2")
        .body(Body::empty())
        .unwrap();
    h.app.clone().oneshot(request).await.unwrap();
    h.ingestor.flush().await;

    let pending = h.storage.fetch_pending_clicks(10).await.unwrap();
    assert_eq!(pending[0].ip_address.as_deref(), Some("198.51.100.4"));
}

#[tokio::test]
async fn test_concurrent_redirects_all_recorded() {
    let h = harness(direct_config()).await;

    let mut handles = vec![];
    for _ in 0..20 {
        let app = h.app.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .uri("/docs/intro")
                .body(Body::empty())
                .unwrap();
            app.oneshot(request).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::FOUND);
    }

    h.ingestor.flush().await;
    assert_eq!(h.storage.count_clicks(h.link.id).await.unwrap(), 20);
}

#[tokio::test]
async fn test_health_check() {
    let h = harness(direct_config()).await;
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
