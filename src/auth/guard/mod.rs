//! Abuse counters and advisory caches.
//!
//! Login failures, lockout flags, and per-address refresh rates live in a
//! [`CounterStore`]: Redis when a URL is configured, an in-process map
//! otherwise. Counter failures never block authentication; the guard logs a
//! warning and answers with the permissive default.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub mod memory;
pub mod redis;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

/// Minimal counter and TTL-cache surface the guard needs from its backend.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment a counter, setting `ttl` when the key is created.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Guard thresholds and windows.
#[derive(Clone, Debug)]
pub struct GuardConfig {
    pub max_login_failures: u64,
    pub login_fail_window: Duration,
    pub login_lock: Duration,
    pub max_refresh_attempts: u64,
    pub refresh_window: Duration,
    pub user_cache_ttl: Duration,
    pub token_cache_ttl: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_login_failures: 5,
            login_fail_window: Duration::from_secs(900),
            login_lock: Duration::from_secs(900),
            max_refresh_attempts: 30,
            refresh_window: Duration::from_secs(900),
            user_cache_ttl: Duration::from_secs(1800),
            token_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl GuardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_login_failures(mut self, max: u64) -> Self {
        self.max_login_failures = max;
        self
    }

    #[must_use]
    pub fn with_login_fail_window(mut self, window: Duration) -> Self {
        self.login_fail_window = window;
        self
    }

    #[must_use]
    pub fn with_login_lock(mut self, lock: Duration) -> Self {
        self.login_lock = lock;
        self
    }

    #[must_use]
    pub fn with_max_refresh_attempts(mut self, max: u64) -> Self {
        self.max_refresh_attempts = max;
        self
    }

    #[must_use]
    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }
}

/// Advisory user snapshot cached after a successful login.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CachedUser {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
}

/// Tracks login failures, lockouts, and refresh rates, plus two advisory
/// caches keyed by username and token digest.
#[derive(Clone)]
pub struct AbuseGuard {
    store: Arc<dyn CounterStore>,
    config: GuardConfig,
}

impl AbuseGuard {
    pub fn new(store: Arc<dyn CounterStore>, config: GuardConfig) -> Self {
        Self { store, config }
    }

    /// Record one failed login for `(username, client_ip)` and lock that
    /// pair out once the threshold is reached. Returns the failure count
    /// observed.
    pub async fn record_login_failure(&self, username: &str, client_ip: &str) -> u64 {
        let key = fail_key(username, client_ip);
        let count = match self.store.incr(&key, self.config.login_fail_window).await {
            Ok(count) => count,
            Err(err) => {
                warn!("counter store unavailable, skipping failure tally: {err:#}");
                return 0;
            }
        };
        if count >= self.config.max_login_failures {
            let lock = lock_key(username, client_ip);
            if let Err(err) = self.store.set_ex(&lock, "1", self.config.login_lock).await {
                warn!("counter store unavailable, lockout flag not set: {err:#}");
            }
        }
        count
    }

    /// Whether `(username, client_ip)` is currently locked out. The same
    /// account from another address is unaffected. Store failure reads as
    /// not locked.
    pub async fn is_locked_out(&self, username: &str, client_ip: &str) -> bool {
        match self.store.exists(&lock_key(username, client_ip)).await {
            Ok(locked) => locked,
            Err(err) => {
                warn!("counter store unavailable, treating account as unlocked: {err:#}");
                false
            }
        }
    }

    /// Clear the failure tally and lockout flag after a successful login.
    pub async fn clear_login_failures(&self, username: &str, client_ip: &str) {
        for key in [fail_key(username, client_ip), lock_key(username, client_ip)] {
            if let Err(err) = self.store.del(&key).await {
                warn!("counter store unavailable, stale counter left behind: {err:#}");
            }
        }
    }

    /// Count one refresh attempt from `client_ip` against the fixed window.
    /// Returns true while the caller is under the limit; store failure reads
    /// as under the limit.
    pub async fn allow_refresh(&self, client_ip: &str) -> bool {
        let key = refresh_key(client_ip);
        match self.store.incr(&key, self.config.refresh_window).await {
            Ok(count) => count <= self.config.max_refresh_attempts,
            Err(err) => {
                warn!("counter store unavailable, allowing refresh: {err:#}");
                true
            }
        }
    }

    /// Cache a user snapshot after a successful credential check.
    pub async fn cache_user(&self, user: &CachedUser) {
        let Ok(body) = serde_json::to_string(user) else {
            return;
        };
        let key = user_key(&user.username);
        if let Err(err) = self
            .store
            .set_ex(&key, &body, self.config.user_cache_ttl)
            .await
        {
            warn!("counter store unavailable, user cache skipped: {err:#}");
        }
    }

    pub async fn cached_user(&self, username: &str) -> Option<CachedUser> {
        let body = match self.store.get(&user_key(username)).await {
            Ok(body) => body?,
            Err(err) => {
                warn!("counter store unavailable, user cache miss: {err:#}");
                return None;
            }
        };
        serde_json::from_str(&body).ok()
    }

    pub async fn evict_user(&self, username: &str) {
        if let Err(err) = self.store.del(&user_key(username)).await {
            warn!("counter store unavailable, user cache entry left behind: {err:#}");
        }
    }

    /// Mirror a freshly issued token as known-good, mapping its digest to
    /// the session it belongs to.
    pub async fn cache_token(&self, token: &str, session_id: &str) {
        let key = token_key(token);
        if let Err(err) = self
            .store
            .set_ex(&key, session_id, self.config.token_cache_ttl)
            .await
        {
            warn!("counter store unavailable, token cache skipped: {err:#}");
        }
    }

    /// Advisory mirror read: the session id the token was issued for, if
    /// the mirror still holds it. A miss proves nothing (restart, TTL
    /// lapse, store failure); callers must fall through to the session
    /// store rather than reject on it.
    pub async fn is_token_cached(&self, token: &str) -> Option<String> {
        match self.store.get(&token_key(token)).await {
            Ok(cached) => cached,
            Err(err) => {
                warn!("counter store unavailable, token cache miss: {err:#}");
                None
            }
        }
    }

    pub async fn evict_token(&self, token: &str) {
        if let Err(err) = self.store.del(&token_key(token)).await {
            warn!("counter store unavailable, token cache entry left behind: {err:#}");
        }
    }
}

fn fail_key(username: &str, client_ip: &str) -> String {
    format!("auth:login:fail:{}:{}", safe(username), safe(client_ip))
}

fn lock_key(username: &str, client_ip: &str) -> String {
    format!("auth:login:lock:{}:{}", safe(username), safe(client_ip))
}

fn refresh_key(client_ip: &str) -> String {
    format!("auth:refresh:rate:{}", safe(client_ip))
}

fn user_key(username: &str) -> String {
    format!("user:{}", safe(username))
}

fn token_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("token:{digest:x}")
}

/// Keep caller-supplied values out of the key namespace separator.
fn safe(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.replace(':', "_")
}
