use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::info;

use crate::app_state::AppState;

/// Resolves the session cookie for every request, minting a session when
/// it is missing or unknown, and makes the [`realtime::Session`] available
/// to handlers as an extension.
pub(crate) async fn resolve_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> (CookieJar, Response) {
    let origin = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let presented = jar
        .get(&state.cookie.name)
        .map(|cookie| cookie.value().to_string());

    let session = state
        .api
        .realtime
        .sessions
        .resolve_or_create(presented.as_deref(), origin)
        .await;

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let token = session.token.clone();
    request.extensions_mut().insert(session);

    let response = next.run(request).await;
    info!(%method, %path, status = response.status().as_u16(), session = %token, "request handled");

    let cookie = Cookie::build((state.cookie.name.clone(), token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.cookie.secure);
    (jar.add(cookie), response)
}
