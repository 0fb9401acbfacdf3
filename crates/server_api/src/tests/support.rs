use realtime::{Realtime, Session};
use shared::protocol::RegisterRequest;
use storage::Storage;

use crate::{accounts, ApiContext};

pub(crate) async fn context() -> ApiContext {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    ApiContext::new(storage, Realtime::new())
}

pub(crate) async fn anonymous(ctx: &ApiContext) -> Session {
    ctx.realtime.sessions.resolve_or_create(None, None).await
}

/// Registers `username` (password `pw-<username>`) in a fresh session and
/// returns that session as it is stored after login.
pub(crate) async fn signed_in(ctx: &ApiContext, username: &str) -> Session {
    let session = anonymous(ctx).await;
    accounts::register(
        ctx,
        &session,
        RegisterRequest {
            email: format!("{username}@example.com"),
            username: username.to_string(),
            password: format!("pw-{username}"),
        },
    )
    .await
    .expect("register");
    refreshed(ctx, &session).await
}

pub(crate) async fn refreshed(ctx: &ApiContext, session: &Session) -> Session {
    ctx.realtime
        .sessions
        .get(&session.token)
        .await
        .expect("session exists")
}
