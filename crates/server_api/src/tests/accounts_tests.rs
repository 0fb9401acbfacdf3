use super::*;
use crate::support::{anonymous, context, refreshed, signed_in};

fn register_request(email: &str, username: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.into(),
        username: username.into(),
        password: password.into(),
    }
}

#[tokio::test]
async fn anonymous_whoami_carries_only_the_session() {
    let ctx = context().await;
    let session = anonymous(&ctx).await;
    let me = whoami(&session);
    assert_eq!(me.session, session.token);
    assert_eq!(me.account_no, None);
    assert_eq!(me.username, None);
}

#[tokio::test]
async fn register_logs_the_new_account_into_the_session() {
    let ctx = context().await;
    let session = anonymous(&ctx).await;
    let me = register(
        &ctx,
        &session,
        register_request("alice@example.com", "alice", "pw1"),
    )
    .await
    .expect("register");
    assert_eq!(me.username.as_deref(), Some("alice"));
    assert_eq!(me.email.as_deref(), Some("alice@example.com"));

    let session = refreshed(&ctx, &session).await;
    assert_eq!(whoami(&session), me);

    let stored = ctx
        .storage
        .find_account_by_username("alice")
        .await
        .expect("lookup")
        .expect("alice");
    assert_ne!(stored.password_hash, "pw1");
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict_and_leaves_account_untouched() {
    let ctx = context().await;
    signed_in(&ctx, "alice").await;
    let before = ctx
        .storage
        .find_account_by_username("alice")
        .await
        .expect("lookup")
        .expect("alice");

    let other = anonymous(&ctx).await;
    let err = register(
        &ctx,
        &other,
        register_request("new@example.com", "alice", "other"),
    )
    .await
    .expect_err("conflict");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(refreshed(&ctx, &other).await.is_anonymous());

    let after = ctx
        .storage
        .find_account_by_username("alice")
        .await
        .expect("lookup")
        .expect("alice");
    assert_eq!(after.profile, before.profile);
    assert_eq!(after.password_hash, before.password_hash);
}

#[tokio::test]
async fn register_requires_every_field() {
    let ctx = context().await;
    let session = anonymous(&ctx).await;
    let err = register(&ctx, &session, register_request(" ", "alice", "pw"))
        .await
        .expect_err("invalid");
    assert_eq!(err.code, ErrorCode::InvalidPayload);
}

#[tokio::test]
async fn login_distinguishes_bad_credentials() {
    let ctx = context().await;
    signed_in(&ctx, "alice").await;
    let session = anonymous(&ctx).await;

    let wrong_password = login(
        &ctx,
        &session,
        LoginRequest {
            username: "alice".into(),
            password: "nope".into(),
        },
    )
    .await
    .expect_err("wrong password");
    assert_eq!(wrong_password.code, ErrorCode::BadCredentials);

    let unknown_user = login(
        &ctx,
        &session,
        LoginRequest {
            username: "mallory".into(),
            password: "pw".into(),
        },
    )
    .await
    .expect_err("unknown user");
    assert_eq!(unknown_user.code, ErrorCode::BadCredentials);
    assert!(refreshed(&ctx, &session).await.is_anonymous());
}

#[tokio::test]
async fn login_then_logout_round_trip() {
    let ctx = context().await;
    signed_in(&ctx, "alice").await;
    let session = anonymous(&ctx).await;

    let me = login(
        &ctx,
        &session,
        LoginRequest {
            username: "alice".into(),
            password: "pw-alice".into(),
        },
    )
    .await
    .expect("login");
    assert_eq!(me.username.as_deref(), Some("alice"));
    assert!(!refreshed(&ctx, &session).await.is_anonymous());

    let out = logout(&ctx, &session).await;
    assert_eq!(out.session, session.token);
    assert!(refreshed(&ctx, &session).await.is_anonymous());
}

#[tokio::test]
async fn search_excludes_caller_and_requires_login() {
    let ctx = context().await;
    let alice = signed_in(&ctx, "alice").await;
    signed_in(&ctx, "alicia").await;
    signed_in(&ctx, "bob").await;

    let found = search_users(&ctx, &alice, "ALI").await.expect("search");
    let names: Vec<_> = found.iter().map(|a| a.username.as_str()).collect();
    assert_eq!(names, vec!["alicia"]);

    let anon = anonymous(&ctx).await;
    let err = search_users(&ctx, &anon, "ali").await.expect_err("anon");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn login_trims_the_username_like_registration_does() {
    let ctx = context().await;
    let first = anonymous(&ctx).await;
    register(
        &ctx,
        &first,
        register_request("alice@example.com", " alice ", "pw1"),
    )
    .await
    .expect("register");

    let session = anonymous(&ctx).await;
    let me = login(
        &ctx,
        &session,
        LoginRequest {
            username: " alice\t".into(),
            password: "pw1".into(),
        },
    )
    .await
    .expect("login with padded username");
    assert_eq!(me.username.as_deref(), Some("alice"));
    assert!(!refreshed(&ctx, &session).await.is_anonymous());

    let err = login(
        &ctx,
        &anonymous(&ctx).await,
        LoginRequest {
            username: "   ".into(),
            password: "pw1".into(),
        },
    )
    .await
    .expect_err("blank username");
    assert_eq!(err.code, ErrorCode::InvalidPayload);
}
