use futures::{SinkExt, StreamExt};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{AccountId, AccountSummary, ChatMessage, SessionToken},
    error::ApiError,
    protocol::{
        ClientFrame, FavoriteRequest, FavoritesResponse, HistoryQuery, LoginRequest,
        LogoutResponse, RegisterRequest, SearchQuery, SendMessageRequest, SendMessageResponse,
        ServerEvent, WhoAmI,
    },
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::{error::ClientError, inbox::Inbox, transcript::Transcript};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Server(ServerEvent),
    Error(String),
    Disconnected,
}

/// HTTP and live-event client for one browser-like session.
///
/// The session cookie is kept in the client's cookie store, so every call
/// made through the same `ChatClient` acts as the same session.
pub struct ChatClient {
    http: Client,
    server_url: String,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(server_url: impl Into<String>) -> Result<Self, ClientError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(server_url));
        }
        let http = Client::builder().cookie_store(true).build()?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            http,
            server_url,
            events,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.server_url))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        decode(request.send().await?).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(self.request(method, path).json(body)).await
    }

    pub async fn whoami(&self) -> Result<WhoAmI, ClientError> {
        self.send(self.request(Method::GET, "/login")).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<WhoAmI, ClientError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let me: WhoAmI = self.send_json(Method::POST, "/login", &request).await?;
        info!(username, "logged in");
        Ok(me)
    }

    pub async fn logout(&self) -> Result<LogoutResponse, ClientError> {
        self.send(self.request(Method::DELETE, "/login")).await
    }

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<WhoAmI, ClientError> {
        let request = RegisterRequest {
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        self.send_json(Method::POST, "/register", &request).await
    }

    pub async fn history(&self, peer: AccountId) -> Result<Vec<ChatMessage>, ClientError> {
        let query = HistoryQuery { user_id: peer };
        self.send(self.request(Method::GET, "/message").query(&query))
            .await
    }

    pub async fn send_message(&self, to: AccountId, content: &str) -> Result<(), ClientError> {
        let request = SendMessageRequest {
            recipient_id: to,
            content: content.to_string(),
        };
        let _: SendMessageResponse = self.send_json(Method::POST, "/message", &request).await?;
        Ok(())
    }

    pub async fn search_users(&self, username: &str) -> Result<Vec<AccountSummary>, ClientError> {
        let query = SearchQuery {
            username: username.to_string(),
        };
        self.send(self.request(Method::GET, "/searchUsers").query(&query))
            .await
    }

    pub async fn favorites(&self) -> Result<Vec<AccountSummary>, ClientError> {
        let response: FavoritesResponse = self.send(self.request(Method::GET, "/favorites")).await?;
        Ok(response.favorites)
    }

    pub async fn add_favorite(&self, target: AccountId) -> Result<Vec<AccountSummary>, ClientError> {
        let request = FavoriteRequest { target_id: target };
        let response: FavoritesResponse =
            self.send_json(Method::POST, "/favorites", &request).await?;
        Ok(response.favorites)
    }

    pub async fn remove_favorite(
        &self,
        target: AccountId,
    ) -> Result<Vec<AccountSummary>, ClientError> {
        let query = FavoriteRequest { target_id: target };
        let response: FavoritesResponse = self
            .send(self.request(Method::DELETE, "/favorites").query(&query))
            .await?;
        Ok(response.favorites)
    }

    /// Fetches history with `peer` and opens the conversation in `inbox`.
    pub async fn open_conversation<'a>(
        &self,
        inbox: &'a mut Inbox,
        peer: AccountSummary,
    ) -> Result<&'a mut Transcript, ClientError> {
        let history = self.history(peer.id).await?;
        Ok(inbox.open_conversation(peer, history))
    }

    /// Opens the live event socket, announces this client's session on it
    /// and forwards decoded events to [`Self::subscribe_events`] receivers.
    pub async fn connect_events(&self) -> Result<JoinHandle<()>, ClientError> {
        let me = self.whoami().await?;
        let ws_url = websocket_url(&self.server_url)?;
        let (ws_stream, _) = connect_async(ws_url.as_str()).await?;
        let (mut writer, mut reader) = ws_stream.split();

        let announce = serde_json::to_string(&ClientFrame::Init {
            session: me.session.clone(),
        })?;
        writer.send(Message::Text(announce)).await?;
        info!(session = %me.session, "live events connected");

        let events = self.events.clone();
        let session: SessionToken = me.session;
        Ok(tokio::spawn(async move {
            // Keeps the write half open for the lifetime of the reader.
            let _writer = writer;
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            let _ = events.send(ClientEvent::Server(event));
                        }
                        Err(err) => {
                            warn!(session = %session, %err, "invalid server event");
                            let _ = events.send(ClientEvent::Error(format!(
                                "invalid server event: {err}"
                            )));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = events.send(ClientEvent::Error(format!(
                            "websocket read failed: {err}"
                        )));
                        break;
                    }
                }
            }
            let _ = events.send(ClientEvent::Disconnected);
        }))
    }
}

pub(crate) fn websocket_url(server_url: &str) -> Result<String, ClientError> {
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ClientError::InvalidUrl(server_url.to_string()));
    };
    Ok(format!("{}/ws", base.trim_end_matches('/')))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(api_error.into()),
        Err(_) => Err(ClientError::Server(format!("{status}: {body}"))),
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
