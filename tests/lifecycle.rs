//! End-to-end lifecycle scenarios against the in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use gardi::auth::{
    error::{AuthError, AuthResult},
    guard::{AbuseGuard, GuardConfig, MemoryCounterStore},
    identity::{Authenticator, ExternalIdentityVerifier, VerifiedIdentity},
    lifecycle::ClientContext,
    session::{MemorySessionStore, NewSession, Session, SessionStore},
    token::{Claims, TokenCodec, TokenConfig, TokenType},
    LifecycleCoordinator,
};

const SECRET: &str = "0123456789abcdef0123456789abcdef";
const GOOGLE_TOKEN: &str = "good-google-token";

struct StaticAuthenticator {
    users: HashMap<String, (Uuid, String, String)>,
}

impl StaticAuthenticator {
    fn with_alice() -> Self {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            (Uuid::new_v4(), "hunter2".to_string(), "USER".to_string()),
        );
        Self { users }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<VerifiedIdentity> {
        let Some((user_id, expected, role)) = self.users.get(username) else {
            return Err(AuthError::UserNotFound);
        };
        if password != expected {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(VerifiedIdentity {
            user_id: *user_id,
            username: username.to_string(),
            role: role.clone(),
        })
    }
}

struct StaticVerifier;

#[async_trait]
impl ExternalIdentityVerifier for StaticVerifier {
    async fn verify(&self, id_token: &str) -> AuthResult<VerifiedIdentity> {
        if id_token != GOOGLE_TOKEN {
            return Err(AuthError::InvalidExternalToken);
        }
        Ok(VerifiedIdentity {
            user_id: Uuid::new_v4(),
            username: "alice@example.com".to_string(),
            role: "USER".to_string(),
        })
    }
}

/// Delegates to the in-memory store but reports zero rows affected for one
/// rotation, the outcome a caller sees after losing the conditional-revoke
/// race to a concurrent request.
struct RacingStore {
    inner: Arc<MemorySessionStore>,
    lose_next_rotation: AtomicBool,
}

#[async_trait]
impl SessionStore for RacingStore {
    async fn create(&self, input: NewSession) -> anyhow::Result<Session> {
        self.inner.create(input).await
    }

    async fn find_by_session_id(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        self.inner.find_by_session_id(session_id).await
    }

    async fn revoke_session(
        &self,
        session_id: &str,
        replaced_by: Option<&str>,
    ) -> anyhow::Result<u64> {
        if replaced_by.is_some() && self.lose_next_rotation.swap(false, Ordering::SeqCst) {
            return Ok(0);
        }
        self.inner.revoke_session(session_id, replaced_by).await
    }

    async fn revoke_family(&self, family_id: &str) -> anyhow::Result<u64> {
        self.inner.revoke_family(family_id).await
    }

    async fn touch(&self, session_id: &str) -> anyhow::Result<()> {
        self.inner.touch(session_id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        self.inner.purge_expired(now).await
    }
}

struct Harness {
    coordinator: LifecycleCoordinator,
    sessions: Arc<MemorySessionStore>,
    codec: Arc<TokenCodec>,
    guard: AbuseGuard,
}

fn harness(guard_config: GuardConfig) -> Harness {
    let codec = Arc::new(
        TokenCodec::new(&TokenConfig::new(SecretString::from(SECRET.to_string())))
            .expect("codec should build"),
    );
    let sessions = Arc::new(MemorySessionStore::new());
    let guard = AbuseGuard::new(Arc::new(MemoryCounterStore::new()), guard_config);
    let coordinator = LifecycleCoordinator::new(
        codec.clone(),
        sessions.clone(),
        guard.clone(),
        Arc::new(StaticAuthenticator::with_alice()),
        Arc::new(StaticVerifier),
    );
    Harness {
        coordinator,
        sessions,
        codec,
        guard,
    }
}

fn ctx(client_ip: &str) -> ClientContext {
    ClientContext {
        client_ip: client_ip.to_string(),
        user_agent: "lifecycle-tests".to_string(),
    }
}

fn family_of(harness: &Harness, refresh_token: &str) -> String {
    harness
        .codec
        .verify(refresh_token)
        .expect("refresh token should verify")
        .fid
        .expect("refresh token should carry a family id")
}

#[tokio::test]
async fn rotation_retires_the_presented_token() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let first = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = family_of(&h, &first.refresh_token);
    assert_eq!(h.sessions.active_in_family(&family), 1);

    let second = h
        .coordinator
        .refresh(&first.refresh_token, &ctx)
        .await
        .expect("first refresh should succeed");

    // Same family, new head, still exactly one active session.
    assert_eq!(family_of(&h, &second.refresh_token), family);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(h.sessions.active_in_family(&family), 1);
}

#[tokio::test]
async fn reuse_kills_the_whole_family() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let first = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = family_of(&h, &first.refresh_token);
    let second = h
        .coordinator
        .refresh(&first.refresh_token, &ctx)
        .await
        .expect("first refresh should succeed");

    // Replaying the retired token is treated as theft.
    let replay = h.coordinator.refresh(&first.refresh_token, &ctx).await;
    assert!(matches!(replay, Err(AuthError::TokenReused)));
    assert_eq!(h.sessions.active_in_family(&family), 0);

    // The legitimate successor is collateral damage; the client must log in
    // again.
    let successor = h.coordinator.refresh(&second.refresh_token, &ctx).await;
    assert!(matches!(successor, Err(AuthError::TokenReused)));

    // A fresh login starts a new family and works normally.
    let again = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("re-login should succeed");
    assert_ne!(family_of(&h, &again.refresh_token), family);
}

#[tokio::test]
async fn lost_rotation_race_reads_as_reuse() {
    let codec = Arc::new(
        TokenCodec::new(&TokenConfig::new(SecretString::from(SECRET.to_string())))
            .expect("codec should build"),
    );
    let inner = Arc::new(MemorySessionStore::new());
    let racing = Arc::new(RacingStore {
        inner: inner.clone(),
        lose_next_rotation: AtomicBool::new(false),
    });
    let guard = AbuseGuard::new(Arc::new(MemoryCounterStore::new()), GuardConfig::default());
    let coordinator = LifecycleCoordinator::new(
        codec.clone(),
        racing.clone(),
        guard,
        Arc::new(StaticAuthenticator::with_alice()),
        Arc::new(StaticVerifier),
    );
    let ctx = ctx("1.2.3.4");

    let pair = coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = codec
        .verify(&pair.refresh_token)
        .expect("verify")
        .fid
        .expect("refresh token should carry a family id");

    // The session read still sees a live row, but the conditional revoke
    // reports that another request rotated it first.
    racing.lose_next_rotation.store(true, Ordering::SeqCst);
    let loser = coordinator.refresh(&pair.refresh_token, &ctx).await;
    assert!(matches!(loser, Err(AuthError::TokenReused)));
    assert_eq!(inner.active_in_family(&family), 0);
}

#[tokio::test]
async fn refresh_token_without_a_family_is_rejected() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let session_id = h
        .codec
        .verify(&pair.refresh_token)
        .expect("verify")
        .sid
        .expect("refresh token should carry a session id");

    // Validly signed, names a live session, but carries no family id.
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: "alice".to_string(),
        role: "USER".to_string(),
        typ: TokenType::Refresh,
        iat: now,
        exp: now + 900,
        sid: Some(session_id),
        fid: None,
    };
    let forged = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode");

    let attempt = h.coordinator.refresh(&forged, &ctx).await;
    assert!(matches!(attempt, Err(AuthError::InvalidToken)));
}

#[tokio::test]
async fn token_mirror_follows_the_session_lifecycle() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let session_id = h
        .codec
        .verify(&pair.refresh_token)
        .expect("verify")
        .sid
        .expect("refresh token should carry a session id");
    assert_eq!(
        h.guard.is_token_cached(&pair.refresh_token).await.as_deref(),
        Some(session_id.as_str())
    );

    // Rotation drops the retired token from the mirror and adds the
    // successor under its own session id.
    let next = h
        .coordinator
        .refresh(&pair.refresh_token, &ctx)
        .await
        .expect("refresh should succeed");
    assert!(h.guard.is_token_cached(&pair.refresh_token).await.is_none());
    let next_session_id = h
        .codec
        .verify(&next.refresh_token)
        .expect("verify")
        .sid
        .expect("refresh token should carry a session id");
    assert_eq!(
        h.guard.is_token_cached(&next.refresh_token).await.as_deref(),
        Some(next_session_id.as_str())
    );

    h.coordinator.logout(&next.refresh_token).await;
    assert!(h.guard.is_token_cached(&next.refresh_token).await.is_none());
}

#[tokio::test]
async fn mirror_mismatch_rejects_without_touching_the_store() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = family_of(&h, &pair.refresh_token);

    // A mirror entry naming a different session than the token's claims.
    h.guard
        .cache_token(&pair.refresh_token, "someone-elses-session")
        .await;

    let attempt = h.coordinator.refresh(&pair.refresh_token, &ctx).await;
    assert!(matches!(attempt, Err(AuthError::InvalidToken)));
    // Only the advisory read ran; the authoritative session is untouched.
    assert_eq!(h.sessions.active_in_family(&family), 1);
}

#[tokio::test]
async fn forged_subject_kills_the_family() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = family_of(&h, &pair.refresh_token);
    let session_id = h
        .codec
        .verify(&pair.refresh_token)
        .expect("verify")
        .sid
        .expect("refresh token should carry a session id");

    // A validly signed token naming alice's session but a different subject.
    let forged = h
        .codec
        .issue_refresh_token("mallory", "USER", &session_id, &family)
        .expect("issue");

    let attempt = h.coordinator.refresh(&forged, &ctx).await;
    assert!(matches!(attempt, Err(AuthError::InvalidToken)));
    assert_eq!(h.sessions.active_in_family(&family), 0);
}

#[tokio::test]
async fn lockout_rejects_even_the_correct_password() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    for _ in 0..5 {
        let attempt = h.coordinator.login("alice", "wrong", &ctx).await;
        assert!(matches!(attempt, Err(AuthError::InvalidCredentials)));
    }

    let locked = h.coordinator.login("alice", "hunter2", &ctx).await;
    assert!(matches!(locked, Err(AuthError::TooManyAttempts)));
}

#[tokio::test]
async fn lockout_is_scoped_to_the_offending_address() {
    let h = harness(GuardConfig::default());
    let near = ctx("1.2.3.4");
    let far = ctx("5.6.7.8");

    for _ in 0..5 {
        let attempt = h.coordinator.login("alice", "wrong", &near).await;
        assert!(matches!(attempt, Err(AuthError::InvalidCredentials)));
    }
    let locked = h.coordinator.login("alice", "hunter2", &near).await;
    assert!(matches!(locked, Err(AuthError::TooManyAttempts)));

    // The same account from another address is unaffected.
    h.coordinator
        .login("alice", "hunter2", &far)
        .await
        .expect("login from another address should succeed");
}

#[tokio::test]
async fn successful_login_resets_the_failure_tally() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    for _ in 0..4 {
        let attempt = h.coordinator.login("alice", "wrong", &ctx).await;
        assert!(matches!(attempt, Err(AuthError::InvalidCredentials)));
    }
    h.coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login under the threshold should succeed");

    // The tally restarted: four more failures do not lock the account.
    for _ in 0..4 {
        let attempt = h.coordinator.login("alice", "wrong", &ctx).await;
        assert!(matches!(attempt, Err(AuthError::InvalidCredentials)));
    }
    h.coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should still succeed");
}

#[tokio::test]
async fn unknown_user_reports_not_found_without_counting() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    for _ in 0..10 {
        let attempt = h.coordinator.login("mallory", "whatever", &ctx).await;
        assert!(matches!(attempt, Err(AuthError::UserNotFound)));
    }

    // No lockout accrues for a username that does not exist.
    let attempt = h.coordinator.login("mallory", "whatever", &ctx).await;
    assert!(matches!(attempt, Err(AuthError::UserNotFound)));
}

#[tokio::test]
async fn refresh_rate_limit_is_per_address() {
    let h = harness(GuardConfig::default().with_max_refresh_attempts(3));
    let near = ctx("1.2.3.4");
    let far = ctx("5.6.7.8");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &near)
        .await
        .expect("login should succeed");

    // Invalid attempts count against the window too.
    for _ in 0..3 {
        let attempt = h.coordinator.refresh("garbage", &near).await;
        assert!(matches!(attempt, Err(AuthError::InvalidToken)));
    }
    let limited = h.coordinator.refresh(&pair.refresh_token, &near).await;
    assert!(matches!(limited, Err(AuthError::TooManyAttempts)));

    // A different address is unaffected, and the token survived the limited
    // attempt.
    h.coordinator
        .refresh(&pair.refresh_token, &far)
        .await
        .expect("refresh from another address should succeed");
}

#[tokio::test]
async fn access_tokens_never_refresh() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");

    let attempt = h.coordinator.refresh(&pair.access_token, &ctx).await;
    assert!(matches!(attempt, Err(AuthError::InvalidToken)));

    // The rejection is not a reuse event; the refresh token still rotates.
    h.coordinator
        .refresh(&pair.refresh_token, &ctx)
        .await
        .expect("refresh should still succeed");
}

#[tokio::test]
async fn expired_session_reads_as_expired_not_reused() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = family_of(&h, &pair.refresh_token);

    let session_id = h
        .codec
        .verify(&pair.refresh_token)
        .expect("verify")
        .sid
        .expect("refresh token should carry a session id");
    h.sessions
        .set_expires_at(&session_id, chrono::Utc::now() - chrono::Duration::hours(1));

    let attempt = h.coordinator.refresh(&pair.refresh_token, &ctx).await;
    assert!(matches!(attempt, Err(AuthError::TokenExpired)));
    // Natural expiry retires the session quietly instead of flagging theft.
    assert_eq!(h.sessions.active_in_family(&family), 0);
}

#[tokio::test]
async fn logout_is_silent_and_idempotent() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login("alice", "hunter2", &ctx)
        .await
        .expect("login should succeed");
    let family = family_of(&h, &pair.refresh_token);

    h.coordinator.logout(&pair.refresh_token).await;
    assert_eq!(h.sessions.active_in_family(&family), 0);

    // Repeats and garbage are absorbed silently.
    h.coordinator.logout(&pair.refresh_token).await;
    h.coordinator.logout("garbage").await;
    h.coordinator.logout(&pair.access_token).await;
}

#[tokio::test]
async fn google_login_starts_a_fresh_family() {
    let h = harness(GuardConfig::default());
    let ctx = ctx("1.2.3.4");

    let pair = h
        .coordinator
        .login_with_google(GOOGLE_TOKEN, &ctx)
        .await
        .expect("google login should succeed");
    let family = family_of(&h, &pair.refresh_token);
    assert_eq!(h.sessions.active_in_family(&family), 1);

    h.coordinator
        .refresh(&pair.refresh_token, &ctx)
        .await
        .expect("refresh should succeed");

    let rejected = h.coordinator.login_with_google("forged", &ctx).await;
    assert!(matches!(rejected, Err(AuthError::InvalidExternalToken)));
}
