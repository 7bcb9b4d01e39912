//! Durable session records and their family lineage.
//!
//! One row per issued refresh token. The raw token value never touches the
//! database; only a deterministic SHA-256 digest is stored so the equality
//! check during refresh is a plain hash comparison against one identified
//! row (it is not a password hash and needs no salt).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

/// One issued refresh token's durable record.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub session_id: String,
    pub family_id: String,
    pub user_id: Uuid,
    /// Owning user's username, joined from the users table.
    pub username: String,
    /// Owning user's role, joined from the users table.
    pub role: String,
    /// Hex SHA-256 digest of the raw refresh token.
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Successor session created when this one was rotated.
    pub replaced_by_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Input for [`SessionStore::create`]. Carries the raw refresh token; the
/// store hashes it before anything is persisted.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub session_id: String,
    pub family_id: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Hex SHA-256 digest of a refresh token, the only form ever persisted.
#[must_use]
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Authoritative persistence of sessions.
///
/// The store is the single writer of truth for session rows; the ephemeral
/// cache mirrors in [`crate::auth::guard`] are advisory only.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new non-revoked session, hashing the raw refresh token.
    async fn create(&self, input: NewSession) -> anyhow::Result<Session>;

    async fn find_by_session_id(&self, session_id: &str) -> anyhow::Result<Option<Session>>;

    /// Conditionally revoke a single session.
    ///
    /// Only a row with `revoked = false` is affected, so when two callers
    /// race on the same `session_id` exactly one observes `1` and the rest
    /// observe `0`. That count is the compare-and-swap outcome rotation
    /// relies on for race-safe reuse detection.
    async fn revoke_session(
        &self,
        session_id: &str,
        replaced_by: Option<&str>,
    ) -> anyhow::Result<u64>;

    /// Revoke every non-revoked session in a family. Used to kill an entire
    /// lineage on suspected theft.
    async fn revoke_family(&self, family_id: &str) -> anyhow::Result<u64>;

    /// Best-effort `last_used_at` update; not security relevant.
    async fn touch(&self, session_id: &str) -> anyhow::Result<()>;

    /// Delete rows past their expiry. Pure garbage collection, safe to run
    /// concurrently with everything else.
    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Spawn the periodic expired-session sweep.
///
/// Runs on its own cadence with no ordering dependency on request handling:
/// it only removes rows already past expiry.
pub fn spawn_purge_worker(store: Arc<dyn SessionStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {purged} expired sessions"),
                Err(err) => warn!("Session purge failed: {err:#}"),
            }
        }
    });
}
