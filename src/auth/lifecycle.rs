//! Session lifecycle coordination: login, refresh rotation, and logout.
//!
//! Every refresh token belongs to a family that traces back to one login.
//! Rotation retires the presented token and issues a successor in the same
//! family; presenting a retired token is treated as theft and kills the
//! whole family. The conditional revoke in [`SessionStore::revoke_session`]
//! makes that detection race-safe: of two concurrent rotations exactly one
//! wins and the other lands in the reuse branch.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::guard::{AbuseGuard, CachedUser};
use super::identity::{Authenticator, ExternalIdentityVerifier, VerifiedIdentity};
use super::session::{hash_refresh_token, NewSession, Session, SessionStore};
use super::token::{TokenCodec, TokenType};

/// Access/refresh pair handed to the client. The refresh token is returned
/// exactly once; only its digest survives server-side.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Caller context captured from the transport layer.
#[derive(Clone, Debug)]
pub struct ClientContext {
    pub client_ip: String,
    pub user_agent: String,
}

pub struct LifecycleCoordinator {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn SessionStore>,
    guard: AbuseGuard,
    authenticator: Arc<dyn Authenticator>,
    external: Arc<dyn ExternalIdentityVerifier>,
}

impl LifecycleCoordinator {
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        guard: AbuseGuard,
        authenticator: Arc<dyn Authenticator>,
        external: Arc<dyn ExternalIdentityVerifier>,
    ) -> Self {
        Self {
            codec,
            sessions,
            guard,
            authenticator,
            external,
        }
    }

    /// Password login. Starts a fresh session family on success.
    ///
    /// The lockout gate runs before the credential check, so a locked
    /// account rejects even the correct password. Failures are tallied per
    /// `(username, client address)` pair; the same account from another
    /// address is unaffected. An unknown username is reported as such and
    /// never counts toward the tally; only a wrong password for an existing
    /// account does.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ctx: &ClientContext,
    ) -> AuthResult<TokenPair> {
        if self.guard.is_locked_out(username, &ctx.client_ip).await {
            warn!(username, client_ip = %ctx.client_ip, "login rejected, account locked out");
            return Err(AuthError::TooManyAttempts);
        }

        let identity = match self.authenticator.verify_password(username, password).await {
            Ok(identity) => identity,
            Err(AuthError::InvalidCredentials) => {
                let failures = self
                    .guard
                    .record_login_failure(username, &ctx.client_ip)
                    .await;
                warn!(username, failures, "login failed, bad credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(err),
        };

        self.guard.clear_login_failures(username, &ctx.client_ip).await;
        self.guard
            .cache_user(&CachedUser {
                user_id: identity.user_id,
                username: identity.username.clone(),
                role: identity.role.clone(),
            })
            .await;

        let family_id = Uuid::new_v4().to_string();
        let pair = self.start_session(&identity, &family_id, ctx).await?;
        info!(username = %identity.username, %family_id, "login succeeded");
        Ok(pair)
    }

    /// External identity-provider login. Provisions the account on first
    /// sight and starts a fresh session family, bypassing password counters.
    pub async fn login_with_google(
        &self,
        id_token: &str,
        ctx: &ClientContext,
    ) -> AuthResult<TokenPair> {
        let identity = self.external.verify(id_token).await?;
        let family_id = Uuid::new_v4().to_string();
        let pair = self.start_session(&identity, &family_id, ctx).await?;
        info!(
            username = %identity.username,
            %family_id,
            "external login succeeded"
        );
        Ok(pair)
    }

    /// Rotate a refresh token: retire the presented one, issue a successor
    /// in the same family.
    pub async fn refresh(&self, refresh_token: &str, ctx: &ClientContext) -> AuthResult<TokenPair> {
        if !self.guard.allow_refresh(&ctx.client_ip).await {
            warn!(client_ip = %ctx.client_ip, "refresh rate limit exceeded");
            return Err(AuthError::TooManyAttempts);
        }

        let claims = self.codec.verify(refresh_token)?;
        if claims.typ != TokenType::Refresh {
            return Err(AuthError::InvalidToken);
        }
        let session_id = claims.sid.ok_or(AuthError::InvalidToken)?;
        if claims.fid.is_none() {
            return Err(AuthError::InvalidToken);
        }

        // Advisory mirror read. A hit that names a different session than
        // the claims is a spliced token and can be rejected outright; a
        // miss proves nothing and falls through to the durable store, which
        // stays authoritative for every accept decision.
        if let Some(cached_session) = self.guard.is_token_cached(refresh_token).await {
            if cached_session != session_id {
                warn!(%session_id, "token mirror disagrees with claims, rejecting");
                return Err(AuthError::InvalidToken);
            }
        }

        let session = self
            .sessions
            .find_by_session_id(&session_id)
            .await
            .map_err(AuthError::Unavailable)?
            .ok_or(AuthError::SessionNotFound)?;

        if session.revoked {
            return self
                .handle_reuse(refresh_token, &session, AuthError::TokenReused)
                .await;
        }
        if session.username != claims.sub {
            // Token subject and session owner disagree. Someone is forging
            // or splicing tokens, so the family goes down with it.
            return self
                .handle_reuse(refresh_token, &session, AuthError::InvalidToken)
                .await;
        }
        if session.refresh_token_hash != hash_refresh_token(refresh_token) {
            return self
                .handle_reuse(refresh_token, &session, AuthError::TokenReused)
                .await;
        }
        if session.expires_at < Utc::now() {
            // Natural expiry is not an attack signal. Retire this session
            // alone and leave the rest of the family untouched.
            if let Err(err) = self.sessions.revoke_session(&session_id, None).await {
                warn!(%session_id, "failed to retire expired session: {err:#}");
            }
            self.guard.evict_token(refresh_token).await;
            return Err(AuthError::TokenExpired);
        }

        if let Err(err) = self.sessions.touch(&session_id).await {
            warn!("failed to record session use: {err:#}");
        }

        let successor_id = Uuid::new_v4().to_string();
        let affected = self
            .sessions
            .revoke_session(&session_id, Some(&successor_id))
            .await
            .map_err(AuthError::Unavailable)?;
        if affected == 0 {
            // Lost the race against a concurrent rotation of the same token.
            return self
                .handle_reuse(refresh_token, &session, AuthError::TokenReused)
                .await;
        }

        let identity = VerifiedIdentity {
            user_id: session.user_id,
            username: session.username.clone(),
            role: session.role.clone(),
        };
        let pair = self
            .issue_session_tokens(&identity, &session.family_id, &successor_id, ctx)
            .await?;
        self.guard.evict_token(refresh_token).await;
        info!(
            username = %identity.username,
            family_id = %session.family_id,
            "refresh token rotated"
        );
        Ok(pair)
    }

    /// Revoke the single session named by the token. Always succeeds from
    /// the caller's point of view: an unverifiable token, a missing
    /// session, or a store hiccup all land in the same silent outcome.
    pub async fn logout(&self, refresh_token: &str) {
        let Ok(claims) = self.codec.verify(refresh_token) else {
            return;
        };
        if claims.typ != TokenType::Refresh {
            return;
        }
        let Some(session_id) = claims.sid else {
            return;
        };
        match self.sessions.revoke_session(&session_id, None).await {
            Ok(affected) => {
                info!(%session_id, affected, "logout processed");
            }
            Err(err) => {
                warn!(%session_id, "logout revoke failed: {err:#}");
            }
        }
        self.guard.evict_token(refresh_token).await;
        self.guard.evict_user(&claims.sub).await;
    }

    async fn handle_reuse(
        &self,
        refresh_token: &str,
        session: &Session,
        err: AuthError,
    ) -> AuthResult<TokenPair> {
        let revoked = self
            .sessions
            .revoke_family(&session.family_id)
            .await
            .map_err(AuthError::Unavailable)?;
        self.guard.evict_token(refresh_token).await;
        self.guard.evict_user(&session.username).await;
        warn!(
            family_id = %session.family_id,
            session_id = %session.session_id,
            revoked,
            "refresh token reuse detected, family revoked"
        );
        Err(err)
    }

    async fn start_session(
        &self,
        identity: &VerifiedIdentity,
        family_id: &str,
        ctx: &ClientContext,
    ) -> AuthResult<TokenPair> {
        let session_id = Uuid::new_v4().to_string();
        self.issue_session_tokens(identity, family_id, &session_id, ctx)
            .await
    }

    async fn issue_session_tokens(
        &self,
        identity: &VerifiedIdentity,
        family_id: &str,
        session_id: &str,
        ctx: &ClientContext,
    ) -> AuthResult<TokenPair> {
        let access_token = self
            .codec
            .issue_access_token(&identity.username, &identity.role)?;
        let refresh_token =
            self.codec
                .issue_refresh_token(&identity.username, &identity.role, session_id, family_id)?;

        let refresh_ttl = chrono::Duration::from_std(self.codec.refresh_ttl())
            .unwrap_or_else(|_| chrono::Duration::days(7));
        self.sessions
            .create(NewSession {
                user_id: identity.user_id,
                username: identity.username.clone(),
                role: identity.role.clone(),
                session_id: session_id.to_string(),
                family_id: family_id.to_string(),
                refresh_token: refresh_token.clone(),
                expires_at: Utc::now() + refresh_ttl,
                client_ip: Some(ctx.client_ip.clone()),
                user_agent: Some(ctx.user_agent.clone()),
            })
            .await
            .map_err(AuthError::Unavailable)?;

        self.guard.cache_token(&refresh_token, session_id).await;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}
