use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by link, user and analytics operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid destination URL: must be an absolute http or https URL")]
    InvalidUrl,
    #[error("invalid short path: {0}")]
    InvalidPath(&'static str),
    #[error("the requested custom path is reserved")]
    PathReserved,
    #[error("the requested custom path is already taken")]
    PathTaken,
    #[error("user does not have permission for this action")]
    NoPermission,
    #[error("short URL not found")]
    ShortUrlNotFound,
    #[error("user is not allowed to delete this short URL")]
    DeleteNotAllowed,
    #[error("user is not allowed to create a custom path with this format")]
    CustomPathNotAllowed,
    #[error("user not found")]
    UserNotFound,
    #[error("user with this username already exists")]
    UserExists,
    #[error("invalid username: {0}")]
    InvalidUsername(&'static str),
    #[error("invalid password: {0}")]
    InvalidPassword(&'static str),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid role '{0}'")]
    InvalidRole(String),
    #[error("the anonymous user cannot be modified this way")]
    SentinelProtected,
    #[error("this chat account is already linked to another user")]
    ChatAlreadyLinked,
    #[error("chat link token is invalid, expired or already used")]
    InvalidLinkToken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => {
                Error::Internal(anyhow::anyhow!("unexpected unique constraint violation"))
            }
            StorageError::Other(e) => Error::Internal(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
