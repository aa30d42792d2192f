use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::Error;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by API handlers
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidUrl
        | Error::InvalidPath(_)
        | Error::InvalidUsername(_)
        | Error::InvalidPassword(_)
        | Error::InvalidRole(_)
        | Error::InvalidLinkToken => StatusCode::BAD_REQUEST,
        Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
        Error::NoPermission
        | Error::DeleteNotAllowed
        | Error::CustomPathNotAllowed
        | Error::PathReserved
        | Error::SentinelProtected => StatusCode::FORBIDDEN,
        Error::ShortUrlNotFound | Error::UserNotFound => StatusCode::NOT_FOUND,
        Error::PathTaken | Error::UserExists | Error::ChatAlreadyLinked => StatusCode::CONFLICT,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            Error::Internal(e) => {
                error!("Internal error while handling request: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
