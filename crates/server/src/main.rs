use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use futures::{SinkExt, StreamExt};
use realtime::{Realtime, Session};
use serde::de::DeserializeOwned;
use server_api::ApiContext;
use shared::{
    domain::{AccountSummary, ChatMessage},
    error::{ApiError, ErrorCode},
    protocol::{
        FavoriteRequest, FavoritesResponse, HistoryQuery, LoginRequest, LogoutResponse,
        RegisterRequest, SearchQuery, SendMessageRequest, SendMessageResponse, WhoAmI,
    },
};
use storage::Storage;
use tokio::sync::mpsc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod session_layer;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

type HttpError = (StatusCode, Json<ApiError>);
type HttpResult<T> = Result<Json<T>, HttpError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = prepare_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext::new(storage, Realtime::new());
    let app = build_router(Arc::new(AppState::new(api, &settings)));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", get(whoami).post(login).delete(logout))
        .route("/register", post(register))
        .route("/message", get(history).post(send_message))
        .route("/searchUsers", get(search_users))
        .route(
            "/favorites",
            get(list_favorites).post(add_favorite).delete(remove_favorite),
        )
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_layer::resolve_session,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized | ErrorCode::BadCredentials => StatusCode::UNAUTHORIZED,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::InvalidPayload => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| http_error(ApiError::new(ErrorCode::InvalidPayload, rejection.body_text())))
}

fn query_params<T: DeserializeOwned>(
    params: Result<Query<T>, QueryRejection>,
) -> Result<T, HttpError> {
    params
        .map(|Query(query)| query)
        .map_err(|rejection| http_error(ApiError::new(ErrorCode::InvalidPayload, rejection.body_text())))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        http_error(ApiError::new(ErrorCode::StorageFailure, "storage unavailable"))
    })?;
    Ok("ok")
}

async fn whoami(Extension(session): Extension<Session>) -> Json<WhoAmI> {
    Json(server_api::whoami(&session))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> HttpResult<WhoAmI> {
    let request = json_body(payload)?;
    server_api::login(&state.api, &session, request)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Json<LogoutResponse> {
    Json(server_api::logout(&state.api, &session).await)
}

async fn register(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> HttpResult<WhoAmI> {
    let request = json_body(payload)?;
    server_api::register(&state.api, &session, request)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn history(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    params: Result<Query<HistoryQuery>, QueryRejection>,
) -> HttpResult<Vec<ChatMessage>> {
    let query = query_params(params)?;
    server_api::history(&state.api, &session, query.user_id)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> HttpResult<SendMessageResponse> {
    let request = json_body(payload)?;
    server_api::send_message(&state.api, &session, request)
        .await
        .map_err(http_error)?;
    Ok(Json(SendMessageResponse::default()))
}

async fn search_users(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> HttpResult<Vec<AccountSummary>> {
    let query = query_params(params)?;
    server_api::search_users(&state.api, &session, &query.username)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn list_favorites(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> HttpResult<FavoritesResponse> {
    server_api::list_favorites(&state.api, &session)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn add_favorite(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<FavoriteRequest>, JsonRejection>,
) -> HttpResult<FavoritesResponse> {
    let request = json_body(payload)?;
    server_api::add_favorite(&state.api, &session, request.target_id)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    params: Result<Query<FavoriteRequest>, QueryRejection>,
) -> HttpResult<FavoritesResponse> {
    let query = query_params(params)?;
    server_api::remove_favorite(&state.api, &session, query.target_id)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// One live connection: anonymous until the client announces its session.
async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let registry = state.api.realtime.registry.clone();
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Arc<String>>(state.outbound_buffer);
    let connection_id = registry.open(outbound).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if sender
                .send(Message::Text(payload.as_str().to_owned()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    registry.handle_frame(connection_id, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(%connection_id, %error, "websocket read failed");
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    registry.close(connection_id).await;
    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
