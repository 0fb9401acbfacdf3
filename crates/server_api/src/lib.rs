//! Request/response operations of the chat service, independent of HTTP.
//!
//! Every operation takes the caller's [`Session`] as resolved by the
//! transport layer and returns `Result<_, ApiError>`.

pub mod accounts;
pub mod credentials;
pub mod favorites;
pub mod messages;

use realtime::{Realtime, Session};
use shared::{
    domain::AccountProfile,
    error::{ApiError, ErrorCode},
};
use storage::Storage;
use tracing::error;

pub use accounts::{find_by_credentials, login, logout, register, search_users, whoami};
pub use favorites::{add_favorite, list_favorites, remove_favorite};
pub use messages::{history, send_message};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub realtime: Realtime,
}

impl ApiContext {
    pub fn new(storage: Storage, realtime: Realtime) -> Self {
        Self { storage, realtime }
    }
}

/// The account bound to `session`, or the session-expired signal.
pub(crate) fn require_account(session: &Session) -> Result<&AccountProfile, ApiError> {
    session.account.as_ref().ok_or_else(ApiError::session_expired)
}

pub(crate) fn invalid(message: &str) -> ApiError {
    ApiError::new(ErrorCode::InvalidPayload, message)
}

/// Storage errors are logged in full and surfaced without detail.
pub(crate) fn storage_failure(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "storage operation failed");
    ApiError::new(ErrorCode::StorageFailure, "storage unavailable")
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;
