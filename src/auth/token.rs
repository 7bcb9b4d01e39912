//! Signed-token encoding and verification with key rotation.
//!
//! Access and refresh tokens are HS256 JWTs. Signing always uses the current
//! key; verification walks the ordered list `{current, previous...}` so the
//! signing secret can rotate with zero downtime. Removing a previous key from
//! the configuration is stateless revocation: every token signed with it
//! fails immediately, nothing else changes.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{AuthError, AuthResult};

/// Minimum signing-key length in bytes (256 bits for HMAC-SHA256).
pub const MIN_SECRET_LENGTH: usize = 32;

const DEFAULT_ACCESS_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Discriminates access tokens from refresh tokens inside the claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims embedded in every issued token.
///
/// Access tokens carry no session linkage; `sid`/`fid` are present on
/// refresh tokens only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the username.
    pub sub: String,
    /// The user's role name (e.g. `"ADMIN"`, `"USER"`).
    pub role: String,
    /// Token type discriminator.
    #[serde(rename = "type")]
    pub typ: TokenType,
    /// Issued-at (UTC Unix timestamp).
    pub iat: i64,
    /// Expiration (UTC Unix timestamp).
    pub exp: i64,
    /// Session id, refresh tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Family id, refresh tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<String>,
}

/// Signing configuration: current key, previous keys, and token lifetimes.
#[derive(Clone)]
pub struct TokenConfig {
    secret: SecretString,
    previous_secrets: Vec<SecretString>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            previous_secrets: Vec::new(),
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_previous_secrets(mut self, secrets: Vec<SecretString>) -> Self {
        self.previous_secrets = secrets;
        self
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }
}

/// Encodes and verifies signed tokens.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_keys: Vec<DecodingKey>,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// Build a codec from the configured keys.
    ///
    /// # Errors
    /// Returns an error when no signing key is configured or the current key
    /// is shorter than [`MIN_SECRET_LENGTH`]; this is a startup-time failure
    /// that must prevent the service from running.
    pub fn new(config: &TokenConfig) -> anyhow::Result<Self> {
        let current = config.secret.expose_secret().trim();
        if current.is_empty() {
            anyhow::bail!("no signing key configured");
        }
        if current.len() < MIN_SECRET_LENGTH {
            anyhow::bail!("signing key must be at least {MIN_SECRET_LENGTH} bytes");
        }

        let mut decoding_keys = vec![DecodingKey::from_secret(current.as_bytes())];
        for previous in &config.previous_secrets {
            let trimmed = previous.expose_secret().trim();
            if !trimmed.is_empty() {
                decoding_keys.push(DecodingKey::from_secret(trimmed.as_bytes()));
            }
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(current.as_bytes()),
            decoding_keys,
            validation: Validation::new(Algorithm::HS256),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        })
    }

    /// Lifetime applied to refresh tokens; the session row shares it.
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue a short-lived access token. Carries no session linkage.
    ///
    /// # Errors
    /// Fails only when the signing key is unusable.
    pub fn issue_access_token(&self, subject: &str, role: &str) -> AuthResult<String> {
        self.sign(subject, role, TokenType::Access, self.access_ttl, None, None)
    }

    /// Issue a refresh token bound to a session and family.
    ///
    /// # Errors
    /// Fails only when the signing key is unusable.
    pub fn issue_refresh_token(
        &self,
        subject: &str,
        role: &str,
        session_id: &str,
        family_id: &str,
    ) -> AuthResult<String> {
        self.sign(
            subject,
            role,
            TokenType::Refresh,
            self.refresh_ttl,
            Some(session_id.to_string()),
            Some(family_id.to_string()),
        )
    }

    /// Verify a token against every accepted key, current first.
    ///
    /// # Errors
    /// All failure modes (bad signature, expired, unparseable) collapse into
    /// [`AuthError::InvalidToken`] so callers cannot distinguish them.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut verified = None;
        // Walk the full list even after a hit to keep effort roughly uniform
        // across key positions; correctness only needs the first success.
        for key in &self.decoding_keys {
            if verified.is_none() {
                if let Ok(data) = decode::<Claims>(token, key, &self.validation) {
                    verified = Some(data.claims);
                }
            }
        }
        verified.ok_or(AuthError::InvalidToken)
    }

    fn sign(
        &self,
        subject: &str,
        role: &str,
        typ: TokenType,
        ttl: Duration,
        sid: Option<String>,
        fid: Option<String>,
    ) -> AuthResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            role: role.to_string(),
            typ,
            iat: now,
            exp: now + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            sid,
            fid,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Unavailable(anyhow::Error::new(err)))
    }
}
