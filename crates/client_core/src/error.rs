use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

/// Failures a chat client can surface, split the way a user needs to see them.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session lost its login; the user should sign in again.
    #[error("session expired, please log in again")]
    SessionExpired,
    #[error("wrong username or password")]
    BadCredentials,
    #[error("an account with that email or username already exists")]
    AlreadyExists,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        match err.code {
            ErrorCode::Unauthorized => Self::SessionExpired,
            ErrorCode::BadCredentials => Self::BadCredentials,
            ErrorCode::Conflict => Self::AlreadyExists,
            ErrorCode::InvalidPayload => Self::Rejected(err.message),
            ErrorCode::NotFound => Self::NotFound(err.message),
            ErrorCode::StorageFailure => Self::Server(err.message),
        }
    }
}

impl ClientError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}
