//! End-to-end session lifecycle over the in-memory stores

use medauth_auth::jwt::keys;
use medauth_auth::{AuthServices, PasswordConfig, PasswordHasher, TokenType};
use medauth_core::{AppConfig, AuthError, ClientContext, SessionSecrets};
use medauth_store::{DurableStore, FastCache, MemoryCache, MemoryStore};
use std::collections::HashSet;
use std::sync::Arc;

const PASSWORD: &str = "Harbor-Lights-2024!";

struct Harness {
    services: AuthServices,
    cache: Arc<MemoryCache>,
    store: Arc<MemoryStore>,
}

fn harness() -> Harness {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryStore::new());
    let secrets = SessionSecrets::new("integration-jwt-secret", "integration-csrf-secret").unwrap();
    let services = AuthServices::new(
        cache.clone(),
        store.clone(),
        &secrets,
        &AppConfig::default(),
        PasswordHasher::new(PasswordConfig::insecure_fast()),
    );
    Harness {
        services,
        cache,
        store,
    }
}

fn browser() -> ClientContext {
    ClientContext::new()
        .with_ip("203.0.113.9")
        .with_user_agent("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0 Safari/537.36")
        .with_device_id("device-1")
}

#[tokio::test]
async fn test_each_login_gets_unique_jtis() {
    let h = harness();
    let ctx = browser();
    h.services
        .accounts
        .register("jti@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap();

    let mut jtis = HashSet::new();
    for _ in 0..5 {
        let login = h
            .services
            .accounts
            .login("jti@example.com", PASSWORD, &ctx)
            .await
            .unwrap();
        let session = h.store.get_session(login.session_id).await.unwrap().unwrap();
        assert!(jtis.insert(session.access_token_jti.clone()));
        assert!(jtis.insert(session.refresh_token_jti.clone().unwrap()));
        assert_eq!(session.device_name.as_deref(), Some("Chrome Desktop"));
    }
}

#[tokio::test]
async fn test_logout_kills_access_and_refresh() {
    let h = harness();
    let ctx = browser();
    h.services
        .accounts
        .register("logout@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap();
    let login = h
        .services
        .accounts
        .login("logout@example.com", PASSWORD, &ctx)
        .await
        .unwrap();

    let claims = h
        .services
        .issuer
        .validate_access_token(&login.tokens.access_token)
        .await
        .unwrap();

    h.services
        .accounts
        .logout(&login.tokens.access_token, &ctx)
        .await
        .unwrap();

    assert!(matches!(
        h.services
            .issuer
            .validate_access_token(&login.tokens.access_token)
            .await,
        Err(AuthError::TokenRevoked)
    ));
    assert!(matches!(
        h.services
            .accounts
            .refresh(&login.tokens.refresh_token, &ctx)
            .await,
        Err(AuthError::TokenRevoked)
    ));
    assert!(!h
        .cache
        .exists(&keys::session_access(&claims.jti))
        .await
        .unwrap());
    assert!(h
        .services
        .issuer
        .is_blacklisted(TokenType::Access, &claims.jti)
        .await
        .unwrap());

    let session = h.store.get_session(login.session_id).await.unwrap().unwrap();
    assert_eq!(session.revoked_reason.as_deref(), Some("user_logout"));
}

#[tokio::test]
async fn test_refresh_rotation_chain() {
    let h = harness();
    let ctx = browser();
    let user = h
        .services
        .accounts
        .register("rotate@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap()
        .user;
    let login = h
        .services
        .accounts
        .login(&user.email, PASSWORD, &ctx)
        .await
        .unwrap();

    let second = h
        .services
        .accounts
        .refresh(&login.tokens.refresh_token, &ctx)
        .await
        .unwrap();
    let third = h
        .services
        .accounts
        .refresh(&second.refresh_token, &ctx)
        .await
        .unwrap();

    // Replaying an already rotated token fails
    assert!(h
        .services
        .accounts
        .refresh(&login.tokens.refresh_token, &ctx)
        .await
        .is_err());
    assert!(h
        .services
        .issuer
        .validate_access_token(&third.access_token)
        .await
        .is_ok());

    let sessions = h.services.accounts.list_sessions(user.id, false).await.unwrap();
    assert_eq!(sessions.len(), 3);
    assert_eq!(
        sessions.iter().filter(|s| s.is_active).count(),
        1,
        "only the newest session stays active"
    );
    assert_eq!(
        sessions
            .iter()
            .filter(|s| s.revoked_reason.as_deref() == Some("token_refresh"))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_concurrent_refresh_has_single_winner() {
    let h = harness();
    let ctx = browser();
    h.services
        .accounts
        .register("race@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap();
    let login = h
        .services
        .accounts
        .login("race@example.com", PASSWORD, &ctx)
        .await
        .unwrap();

    let token = login.tokens.refresh_token.clone();
    let (first, second) = futures::join!(
        h.services.accounts.refresh(&token, &ctx),
        h.services.accounts.refresh(&token, &ctx)
    );

    let winners = [first.is_ok(), second.is_ok()]
        .into_iter()
        .filter(|ok| *ok)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_password_reset_ends_every_session() {
    let h = harness();
    let ctx = browser();
    let user = h
        .services
        .accounts
        .register("reset@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap()
        .user;

    let mut logins = Vec::new();
    for _ in 0..3 {
        logins.push(
            h.services
                .accounts
                .login(&user.email, PASSWORD, &ctx)
                .await
                .unwrap(),
        );
    }

    let token = h
        .services
        .accounts
        .request_password_reset(&user.email, &ctx)
        .await
        .unwrap()
        .unwrap();

    // Cache entry lost: the durable row still authorizes the reset
    h.cache.flush().await;

    let revoked = h
        .services
        .accounts
        .reset_password(&token, "Quiet-Meadow-Path-5?")
        .await
        .unwrap();
    assert_eq!(revoked, 3);

    for login in &logins {
        assert!(h
            .services
            .issuer
            .validate_access_token(&login.tokens.access_token)
            .await
            .is_err());
    }
    assert!(h
        .services
        .accounts
        .list_sessions(user.id, true)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        h.services.tokens.verify_password_reset_token(&token).await,
        Err(AuthError::TokenAlreadyUsed)
    ));

    assert!(matches!(
        h.services.accounts.login(&user.email, PASSWORD, &ctx).await,
        Err(AuthError::InvalidCredentials)
    ));
    let fresh = h
        .services
        .accounts
        .login(&user.email, "Quiet-Meadow-Path-5?", &ctx)
        .await
        .unwrap();
    assert_eq!(fresh.user.failed_login_count, 0);
}

#[tokio::test]
async fn test_lockout_and_admin_unlock() {
    let h = harness();
    let ctx = browser();
    let user = h
        .services
        .accounts
        .register("lockout@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap()
        .user;

    for attempt in 1..=5 {
        let result = h
            .services
            .accounts
            .login(&user.email, "Not-The-Password-1!", &ctx)
            .await;
        assert!(
            matches!(result, Err(AuthError::InvalidCredentials)),
            "attempt {attempt}"
        );
    }

    let stored = h.store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(stored.failed_login_count, 5);
    assert!(stored.is_locked());

    assert!(matches!(
        h.services.accounts.login(&user.email, PASSWORD, &ctx).await,
        Err(AuthError::AccountLocked { .. })
    ));

    h.services.accounts.unlock_user(user.id, None).await.unwrap();
    let login = h
        .services
        .accounts
        .login(&user.email, PASSWORD, &ctx)
        .await
        .unwrap();
    assert_eq!(login.user.failed_login_count, 0);
}

#[tokio::test]
async fn test_lockout_lapses_without_admin() {
    let h = harness();
    let ctx = browser();
    let user = h
        .services
        .accounts
        .register("lapse@example.com", PASSWORD, None, &ctx)
        .await
        .unwrap()
        .user;

    for _ in 0..5 {
        let _ = h
            .services
            .accounts
            .login(&user.email, "Not-The-Password-1!", &ctx)
            .await;
    }
    assert!(matches!(
        h.services.accounts.login(&user.email, PASSWORD, &ctx).await,
        Err(AuthError::AccountLocked { .. })
    ));

    // Lockout window runs out
    let mut stored = h.store.get_user(user.id).await.unwrap().unwrap();
    stored.locked_until = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
    h.store.update_user(&stored).await.unwrap();

    let login = h
        .services
        .accounts
        .login(&user.email, PASSWORD, &ctx)
        .await
        .unwrap();
    assert_eq!(login.user.failed_login_count, 0);
    assert!(login.user.locked_until.is_none());
    assert!(h
        .services
        .issuer
        .validate_access_token(&login.tokens.access_token)
        .await
        .is_ok());
}
