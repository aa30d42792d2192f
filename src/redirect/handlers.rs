use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use super::ip::extract_client_ip;
use crate::analytics::ClickIngestor;
use crate::config::IngestConfig;
use crate::error::Error;
use crate::links::LinkService;

pub struct RedirectState {
    pub links: Arc<LinkService>,
    pub ingestor: ClickIngestor,
    pub ingest_config: IngestConfig,
}

/// Redirect to the original URL and hand the click to the ingestor
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let link = match state.links.resolve(&path).await {
        Ok(link) => link,
        Err(Error::ShortUrlNotFound) => {
            return (StatusCode::NOT_FOUND, "URL not found").into_response();
        }
        Err(e) => {
            error!(short_path = %path, "Failed to resolve short path: {e:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let location = match location_header(&link.original_url) {
        Some(value) => value,
        None => {
            warn!(link_id = link.id, "Stored destination is not a valid Location header");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let headers = request.headers();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| extract_client_ip(headers, addr.ip(), &state.ingest_config))
        .map(|ip| ip.to_string());

    state.ingestor.record(link.id, user_agent, client_ip);

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
    )
        .into_response()
}

/// Normalised (punycode, percent-encoded) form of a stored destination
fn location_header(destination: &str) -> Option<HeaderValue> {
    let normalised = url::Url::parse(destination).ok()?;
    HeaderValue::from_str(normalised.as_str()).ok()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
