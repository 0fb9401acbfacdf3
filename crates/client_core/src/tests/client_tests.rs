use std::time::Duration;

use super::*;
use axum::{
    extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

const TOKEN: &str = "test-session";

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn whoami(headers: HeaderMap) -> impl IntoResponse {
    let has_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(&format!("session={TOKEN}")));
    let body = if has_cookie {
        json!({ "session": TOKEN, "accountNo": 1, "email": "a@example.com", "username": "alice" })
    } else {
        json!({ "session": TOKEN })
    };
    (
        [(header::SET_COOKIE, format!("session={TOKEN}; Path=/"))],
        Json(body),
    )
}

fn api_error(status: StatusCode, code: &str) -> impl IntoResponse {
    (status, Json(json!({ "code": code, "message": code })))
}

fn error_app() -> Router {
    Router::new()
        .route(
            "/login",
            post(|| async { api_error(StatusCode::UNAUTHORIZED, "bad_credentials") }),
        )
        .route(
            "/register",
            post(|| async { api_error(StatusCode::CONFLICT, "conflict") }),
        )
        .route(
            "/message",
            post(|| async { api_error(StatusCode::UNAUTHORIZED, "unauthorized") }),
        )
        .route(
            "/favorites",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        )
}

#[test]
fn websocket_url_follows_http_scheme() {
    assert_eq!(
        websocket_url("http://localhost:8080").expect("ws"),
        "ws://localhost:8080/ws"
    );
    assert_eq!(
        websocket_url("https://chat.example.com/").expect("wss"),
        "wss://chat.example.com/ws"
    );
    assert!(matches!(
        websocket_url("ftp://nope"),
        Err(ClientError::InvalidUrl(_))
    ));
    assert!(ChatClient::new("localhost:8080").is_err());
}

#[tokio::test]
async fn session_cookie_is_kept_between_calls() {
    let url = spawn_server(Router::new().route("/login", get(whoami))).await;
    let client = ChatClient::new(url).expect("client");

    let first = client.whoami().await.expect("first");
    assert_eq!(first.username, None);
    let second = client.whoami().await.expect("second");
    assert_eq!(second.session.as_str(), TOKEN);
    assert_eq!(second.username.as_deref(), Some("alice"));
}

#[tokio::test]
async fn error_bodies_map_to_distinct_client_errors() {
    let url = spawn_server(error_app()).await;
    let client = ChatClient::new(url).expect("client");

    let err = client.login("alice", "nope").await.expect_err("login");
    assert!(matches!(err, ClientError::BadCredentials), "{err:?}");

    let err = client
        .register("a@example.com", "alice", "pw")
        .await
        .expect_err("register");
    assert!(matches!(err, ClientError::AlreadyExists), "{err:?}");

    let err = client
        .send_message(AccountId(2), "hi")
        .await
        .expect_err("send");
    assert!(err.is_session_expired(), "{err:?}");

    let err = client.favorites().await.expect_err("favorites");
    assert!(matches!(err, ClientError::Server(ref m) if m.contains("502")), "{err:?}");
}

async fn scripted_socket(mut socket: WebSocket) {
    let Some(Ok(AxumMessage::Text(announce))) = socket.recv().await else {
        return;
    };
    let frame: serde_json::Value = serde_json::from_str(&announce).expect("announce json");
    assert_eq!(frame, json!({ "action": "init", "session": TOKEN }));

    let _ = socket
        .send(AxumMessage::Text(json!({ "action": "init", "session": TOKEN }).to_string()))
        .await;
    let _ = socket
        .send(AxumMessage::Text(
            json!({
                "_id": "01900000-0000-7000-8000-000000000000",
                "from": 2,
                "to": 1,
                "content": "hi",
                "myMessage": false,
                "fromUsername": "bob"
            })
            .to_string(),
        ))
        .await;
    let _ = socket.send(AxumMessage::Text("garbage".into())).await;
    let _ = socket.send(AxumMessage::Close(None)).await;
}

#[tokio::test]
async fn connect_events_announces_and_forwards_events() {
    let app = Router::new().route("/login", get(whoami)).route(
        "/ws",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(scripted_socket) }),
    );
    let url = spawn_server(app).await;
    let client = ChatClient::new(url).expect("client");
    let mut events = client.subscribe_events();

    let reader = client.connect_events().await.expect("connect");

    let mut received = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timely event")
            .expect("channel open");
        let done = matches!(event, ClientEvent::Disconnected);
        received.push(event);
        if done {
            break;
        }
    }
    reader.await.expect("reader task");

    assert!(matches!(
        &received[0],
        ClientEvent::Server(ServerEvent::AnnounceAck { session }) if session.as_str() == TOKEN
    ));
    match &received[1] {
        ClientEvent::Server(ServerEvent::Delivery {
            message,
            from_username,
        }) => {
            assert_eq!(message.content, "hi");
            assert_eq!(from_username, "bob");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(&received[2], ClientEvent::Error(_)));
    assert!(matches!(&received[3], ClientEvent::Disconnected));
}
