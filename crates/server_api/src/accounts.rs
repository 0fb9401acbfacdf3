use realtime::Session;
use shared::{
    domain::{AccountProfile, AccountSummary},
    error::{ApiError, ErrorCode},
    protocol::{LoginRequest, LogoutResponse, RegisterRequest, WhoAmI, SEARCH_LIMIT},
};
use storage::CreateAccountOutcome;
use tracing::{info, warn};

use crate::{credentials, invalid, require_account, storage_failure, ApiContext};

pub fn whoami(session: &Session) -> WhoAmI {
    WhoAmI::new(session.token.clone(), session.account.as_ref())
}

/// Looks up the account for a username/password pair.
pub async fn find_by_credentials(
    ctx: &ApiContext,
    username: &str,
    password: &str,
) -> Result<AccountProfile, ApiError> {
    let bad_credentials = || ApiError::new(ErrorCode::BadCredentials, "wrong username or password");
    let stored = ctx
        .storage
        .find_account_by_username(username)
        .await
        .map_err(storage_failure)?
        .ok_or_else(bad_credentials)?;

    match credentials::verify_password(password, &stored.password_hash) {
        Ok(true) => Ok(stored.profile),
        Ok(false) => Err(bad_credentials()),
        Err(error) => {
            warn!(account_id = %stored.profile.id, %error, "stored credential is unreadable");
            Err(ApiError::new(
                ErrorCode::StorageFailure,
                "stored credential is unreadable",
            ))
        }
    }
}

pub async fn login(
    ctx: &ApiContext,
    session: &Session,
    request: LoginRequest,
) -> Result<WhoAmI, ApiError> {
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(invalid("username and password are required"));
    }
    let account = match find_by_credentials(ctx, username, &request.password).await {
        Ok(account) => account,
        Err(err) => {
            info!(session = %session.token, %username, code = ?err.code, "login rejected");
            return Err(err);
        }
    };

    ctx.realtime
        .sessions
        .authenticate(&session.token, account.clone())
        .await;
    info!(session = %session.token, account_id = %account.id, "login succeeded");
    Ok(WhoAmI::new(session.token.clone(), Some(&account)))
}

pub async fn logout(ctx: &ApiContext, session: &Session) -> LogoutResponse {
    ctx.realtime.sessions.deauthenticate(&session.token).await;
    LogoutResponse {
        session: session.token.clone(),
    }
}

/// Creates the account and logs it into the calling session.
pub async fn register(
    ctx: &ApiContext,
    session: &Session,
    request: RegisterRequest,
) -> Result<WhoAmI, ApiError> {
    let email = request.email.trim();
    let username = request.username.trim();
    if email.is_empty() || username.is_empty() || request.password.is_empty() {
        return Err(invalid("email, username and password are required"));
    }

    let password_hash = credentials::hash_password(&request.password);
    let outcome = ctx
        .storage
        .create_account(email, username, &password_hash)
        .await
        .map_err(storage_failure)?;
    let account = match outcome {
        CreateAccountOutcome::Created(account) => account,
        CreateAccountOutcome::Conflict => {
            info!(%username, "registration conflict");
            return Err(ApiError::new(
                ErrorCode::Conflict,
                "email or username already registered",
            ));
        }
    };

    ctx.realtime
        .sessions
        .authenticate(&session.token, account.clone())
        .await;
    info!(session = %session.token, account_id = %account.id, %username, "account registered");
    Ok(WhoAmI::new(session.token.clone(), Some(&account)))
}

/// Accounts whose username contains `query`, never including the caller.
pub async fn search_users(
    ctx: &ApiContext,
    session: &Session,
    query: &str,
) -> Result<Vec<AccountSummary>, ApiError> {
    let caller = require_account(session)?;
    ctx.storage
        .search_accounts(query.trim(), SEARCH_LIMIT, Some(caller.id))
        .await
        .map_err(storage_failure)
}

#[cfg(test)]
#[path = "tests/accounts_tests.rs"]
mod tests;
