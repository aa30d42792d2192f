//! Caller resolution for API requests
//!
//! Requests carry a session token either as `Authorization: Bearer <token>`
//! or in the `jwt` cookie. The token only identifies the user; permissions
//! are always re-read from storage so role changes apply immediately.
//! Anything missing, invalid or stale resolves to [`Caller::Anonymous`].

pub mod token;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::permission::Permission;
use crate::storage::Storage;

pub use token::{Claims, TokenService};

/// Name of the cookie the session token may be stored in
pub const SESSION_COOKIE: &str = "jwt";

/// An authenticated user as seen by core operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub permissions: Permission,
}

/// Who is performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(AuthUser),
}

impl Caller {
    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            Caller::Anonymous => None,
            Caller::User(user) => Some(user),
        }
    }

    pub fn permissions(&self) -> Permission {
        self.user().map_or(Permission::NONE, |u| u.permissions)
    }
}

impl From<&crate::models::User> for AuthUser {
    fn from(user: &crate::models::User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            permissions: user.permissions,
        }
    }
}

pub struct Authenticator {
    tokens: TokenService,
    storage: Arc<dyn Storage>,
}

impl Authenticator {
    pub fn new(tokens: TokenService, storage: Arc<dyn Storage>) -> Self {
        Self { tokens, storage }
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Caller {
        let Some(token) = extract_token(headers) else {
            return Caller::Anonymous;
        };

        let claims = match self.tokens.verify(&token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Rejected session token: {e:#}");
                return Caller::Anonymous;
            }
        };

        match self.storage.get_user_by_id(claims.sub).await {
            Ok(Some(user)) if !user.is_anonymous() => Caller::User(AuthUser::from(&user)),
            Ok(_) => Caller::Anonymous,
            Err(e) => {
                warn!(user_id = claims.sub, "Failed to load token subject: {e:#}");
                Caller::Anonymous
            }
        }
    }
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Attach the resolved [`Caller`] to the request extensions
pub async fn auth_middleware(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = auth.resolve(request.headers()).await;
    request.extensions_mut().insert(caller);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_extract_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; jwt=tok123"));
        assert_eq!(extract_token(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn test_bearer_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header"));
        headers.insert(header::COOKIE, HeaderValue::from_static("jwt=cookie"));
        assert_eq!(extract_token(&headers).as_deref(), Some("header"));
    }

    #[test]
    fn test_no_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        headers.insert(header::COOKIE, HeaderValue::from_static("jwt="));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_caller_permissions() {
        assert_eq!(Caller::Anonymous.permissions(), Permission::NONE);
        let caller = Caller::User(AuthUser {
            id: 1,
            username: "a".into(),
            permissions: Permission::DELETE_OWN,
        });
        assert_eq!(caller.permissions(), Permission::DELETE_OWN);
        assert_eq!(caller.user().map(|u| u.id), Some(1));
    }
}
