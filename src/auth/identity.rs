//! Credential and external identity verification.
//!
//! The coordinator only ever sees a [`VerifiedIdentity`]; how it was proven
//! (password hash, Google id token) stays behind these traits.

use anyhow::Context;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, Row};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Identity established by a credential or external-token check.
#[derive(Clone, Debug)]
pub struct VerifiedIdentity {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
}

/// Password credential verification.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify_password(&self, username: &str, password: &str)
        -> AuthResult<VerifiedIdentity>;
}

/// External identity-provider token verification. Implementations provision
/// a local account on first sight.
#[async_trait]
pub trait ExternalIdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> AuthResult<VerifiedIdentity>;
}

struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
}

/// Verifies passwords against Argon2 hashes in the `users` table.
#[derive(Clone)]
pub struct PgAuthenticator {
    pool: PgPool,
}

impl PgAuthenticator {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user(&self, username: &str) -> AuthResult<Option<UserRow>> {
        let query = "SELECT id, username, password_hash, role FROM users WHERE username = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query,
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to query user")
            .map_err(AuthError::Unavailable)?;
        Ok(row.map(|row| UserRow {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            role: row.get("role"),
        }))
    }
}

#[async_trait]
impl Authenticator for PgAuthenticator {
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<VerifiedIdentity> {
        let Some(user) = self.find_user(username).await? else {
            return Err(AuthError::UserNotFound);
        };
        verify_argon2(password, &user.password_hash)?;
        Ok(VerifiedIdentity {
            user_id: user.id,
            username: user.username,
            role: user.role,
        })
    }
}

fn verify_argon2(password: &str, stored_hash: &str) -> AuthResult<()> {
    let parsed = PasswordHash::new(stored_hash).map_err(|err| {
        warn!("stored password hash is malformed: {err}");
        AuthError::InvalidCredentials
    })?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::InvalidCredentials)
}

/// Hash a password for storage. Used by account provisioning and tests.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

#[derive(Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
}

/// Validates Google id tokens against the tokeninfo endpoint and provisions
/// a local account keyed by the Google subject.
#[derive(Clone)]
pub struct GoogleVerifier {
    client_id: String,
    http: reqwest::Client,
    pool: PgPool,
}

impl GoogleVerifier {
    #[must_use]
    pub fn new(client_id: String, http: reqwest::Client, pool: PgPool) -> Self {
        Self {
            client_id,
            http,
            pool,
        }
    }

    async fn introspect(&self, id_token: &str) -> AuthResult<TokenInfo> {
        let response = self
            .http
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .context("tokeninfo request failed")
            .map_err(AuthError::Unavailable)?;
        if !response.status().is_success() {
            return Err(AuthError::InvalidExternalToken);
        }
        let info: TokenInfo = response
            .json()
            .await
            .map_err(|_| AuthError::InvalidExternalToken)?;
        if info.aud != self.client_id {
            return Err(AuthError::InvalidExternalToken);
        }
        Ok(info)
    }

    async fn upsert_user(&self, info: &TokenInfo) -> AuthResult<VerifiedIdentity> {
        let username = match &info.email {
            Some(email) => email.clone(),
            None => format!("google-{}", info.sub),
        };
        let query = "INSERT INTO users (username, password_hash, role, email, google_id, provider) \
             VALUES ($1, '', 'USER', $2, $3, 'google') \
             ON CONFLICT (google_id) DO UPDATE SET email = EXCLUDED.email \
             RETURNING id, username, role";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query,
        );
        let row = sqlx::query(query)
            .bind(&username)
            .bind(&info.email)
            .bind(&info.sub)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert google user")
            .map_err(AuthError::Unavailable)?;
        Ok(VerifiedIdentity {
            user_id: row.get("id"),
            username: row.get("username"),
            role: row.get("role"),
        })
    }
}

#[async_trait]
impl ExternalIdentityVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> AuthResult<VerifiedIdentity> {
        let info = self.introspect(id_token).await?;
        self.upsert_user(&info).await
    }
}

/// Stands in when no identity-provider client id is configured.
pub struct DisabledVerifier;

#[async_trait]
impl ExternalIdentityVerifier for DisabledVerifier {
    async fn verify(&self, _id_token: &str) -> AuthResult<VerifiedIdentity> {
        warn!("external login attempted but no provider is configured");
        Err(AuthError::InvalidExternalToken)
    }
}
