use super::*;
use shared::domain::AccountProfile;

fn profile(id: i64, username: &str) -> AccountProfile {
    AccountProfile {
        id: AccountId(id),
        email: format!("{username}@example.com"),
        username: username.to_string(),
    }
}

fn init(token: &SessionToken) -> String {
    serde_json::json!({ "action": "init", "session": token.as_str() }).to_string()
}

#[tokio::test]
async fn connection_starts_unbound_and_binds_on_valid_announce() {
    let sessions = SessionStore::new();
    let registry = ConnectionRegistry::new(sessions.clone());
    let session = sessions.resolve_or_create(None, None).await;
    let (tx, mut rx) = mpsc::channel(8);

    let connection_id = registry.open(tx).await;
    assert_eq!(registry.state(connection_id).await, ConnectionState::OpenUnbound);

    let outcome = registry
        .handle_frame(connection_id, &init(&session.token))
        .await;
    assert_eq!(
        outcome,
        Some(AnnounceOutcome::Bound {
            session: session.token.clone(),
            displaced: None
        })
    );
    assert_eq!(registry.state(connection_id).await, ConnectionState::Bound);
    assert_eq!(
        registry.connection_for_session(&session.token).await,
        Some(connection_id)
    );

    let ack: ServerEvent = serde_json::from_str(&rx.try_recv().expect("ack")).expect("decode");
    assert_eq!(
        ack,
        ServerEvent::AnnounceAck {
            session: session.token
        }
    );
}

#[tokio::test]
async fn unknown_session_and_malformed_frames_are_ignored() {
    let sessions = SessionStore::new();
    let registry = ConnectionRegistry::new(sessions.clone());
    let (tx, mut rx) = mpsc::channel(8);
    let connection_id = registry.open(tx).await;

    let outcome = registry
        .handle_frame(connection_id, &init(&SessionToken::from("forged")))
        .await;
    assert_eq!(outcome, Some(AnnounceOutcome::UnknownSession));
    assert_eq!(registry.handle_frame(connection_id, "not json").await, None);
    assert_eq!(
        registry
            .handle_frame(connection_id, r#"{"action":"typing"}"#)
            .await,
        None
    );

    assert_eq!(registry.state(connection_id).await, ConnectionState::OpenUnbound);
    assert!(rx.try_recv().is_err(), "no negative acknowledgement is sent");
}

#[tokio::test]
async fn close_detaches_session_deterministically() {
    let sessions = SessionStore::new();
    let registry = ConnectionRegistry::new(sessions.clone());
    let session = sessions.resolve_or_create(None, None).await;
    sessions.authenticate(&session.token, profile(1, "alice")).await;
    let (tx, _rx) = mpsc::channel(8);
    let connection_id = registry.open(tx).await;
    registry
        .announce(
            connection_id,
            ClientFrame::Init {
                session: session.token.clone(),
            },
        )
        .await;
    assert_eq!(
        registry.connections_for_account(AccountId(1)).await,
        vec![connection_id]
    );

    registry.close(connection_id).await;

    assert_eq!(registry.state(connection_id).await, ConnectionState::Closed);
    assert!(registry.is_empty().await);
    assert_eq!(sessions.get(&session.token).await.expect("s").connection, None);
    assert!(registry.connections_for_account(AccountId(1)).await.is_empty());

    // Closing twice is harmless.
    registry.close(connection_id).await;
}

#[tokio::test]
async fn announce_after_close_does_not_leave_a_binding() {
    let sessions = SessionStore::new();
    let registry = ConnectionRegistry::new(sessions.clone());
    let session = sessions.resolve_or_create(None, None).await;
    let (tx, _rx) = mpsc::channel(8);
    let connection_id = registry.open(tx).await;
    registry.close(connection_id).await;

    let outcome = registry
        .announce(
            connection_id,
            ClientFrame::Init {
                session: session.token.clone(),
            },
        )
        .await;
    assert_eq!(outcome, AnnounceOutcome::ConnectionClosed);
    assert_eq!(sessions.get(&session.token).await.expect("s").connection, None);
}

#[tokio::test]
async fn second_announce_on_same_session_wins() {
    let sessions = SessionStore::new();
    let registry = ConnectionRegistry::new(sessions.clone());
    let session = sessions.resolve_or_create(None, None).await;
    sessions.authenticate(&session.token, profile(1, "alice")).await;

    let (tx1, _rx1) = mpsc::channel(8);
    let (tx2, _rx2) = mpsc::channel(8);
    let first = registry.open(tx1).await;
    let second = registry.open(tx2).await;
    registry.handle_frame(first, &init(&session.token)).await;
    let outcome = registry.handle_frame(second, &init(&session.token)).await;

    assert_eq!(
        outcome,
        Some(AnnounceOutcome::Bound {
            session: session.token.clone(),
            displaced: Some(first)
        })
    );
    assert_eq!(
        registry.connections_for_account(AccountId(1)).await,
        vec![second]
    );
    assert_eq!(registry.state(first).await, ConnectionState::OpenUnbound);
    assert_eq!(registry.state(second).await, ConnectionState::Bound);
    assert!(sessions.session_for_connection(first).await.is_none());

    // Re-announcing the displaced connection takes the session back.
    registry.handle_frame(first, &init(&session.token)).await;
    assert_eq!(registry.state(first).await, ConnectionState::Bound);
    assert_eq!(registry.state(second).await, ConnectionState::OpenUnbound);
}

#[tokio::test]
async fn account_lookup_spans_all_bound_sessions() {
    let sessions = SessionStore::new();
    let registry = ConnectionRegistry::new(sessions.clone());
    let mut expected = Vec::new();
    for _ in 0..3 {
        let session = sessions.resolve_or_create(None, None).await;
        sessions.authenticate(&session.token, profile(9, "multi")).await;
        let (tx, _rx) = mpsc::channel(8);
        let connection_id = registry.open(tx).await;
        registry.handle_frame(connection_id, &init(&session.token)).await;
        expected.push(connection_id);
    }

    let mut found = registry.connections_for_account(AccountId(9)).await;
    found.sort_by_key(|c| c.0);
    assert_eq!(found, expected);
}
