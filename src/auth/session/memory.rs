//! In-memory session store.
//!
//! Mirrors the PostgreSQL backend's semantics, including the conditional
//! revoke's compare-and-swap outcome. Used by the lifecycle tests and by
//! deployments that run without a database (development only; rows do not
//! survive a restart).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use super::{hash_refresh_token, NewSession, Session, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
    rows: Mutex<Vec<Session>>,
    next_id: Mutex<i64>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-revoked sessions in a family. Test visibility helper.
    #[must_use]
    pub fn active_in_family(&self, family_id: &str) -> usize {
        let rows = self.rows.lock().expect("session store mutex poisoned");
        rows.iter()
            .filter(|s| s.family_id == family_id && !s.revoked)
            .count()
    }

    /// Overwrite a session's expiry. Lets tests drive the natural-expiry
    /// path without faking a clock.
    pub fn set_expires_at(&self, session_id: &str, expires_at: DateTime<Utc>) {
        let mut rows = self.rows.lock().expect("session store mutex poisoned");
        if let Some(row) = rows.iter_mut().find(|s| s.session_id == session_id) {
            row.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, input: NewSession) -> Result<Session> {
        let mut next_id = self.next_id.lock().expect("session store mutex poisoned");
        *next_id += 1;
        let session = Session {
            id: *next_id,
            session_id: input.session_id,
            family_id: input.family_id,
            user_id: input.user_id,
            username: input.username,
            role: input.role,
            refresh_token_hash: hash_refresh_token(&input.refresh_token),
            expires_at: input.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by_session_id: None,
            created_at: Utc::now(),
            last_used_at: None,
            client_ip: input.client_ip,
            user_agent: input.user_agent,
        };
        drop(next_id);

        let mut rows = self.rows.lock().expect("session store mutex poisoned");
        rows.push(session.clone());
        Ok(session)
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Session>> {
        let rows = self.rows.lock().expect("session store mutex poisoned");
        Ok(rows.iter().find(|s| s.session_id == session_id).cloned())
    }

    async fn revoke_session(&self, session_id: &str, replaced_by: Option<&str>) -> Result<u64> {
        let mut rows = self.rows.lock().expect("session store mutex poisoned");
        match rows
            .iter_mut()
            .find(|s| s.session_id == session_id && !s.revoked)
        {
            Some(row) => {
                row.revoked = true;
                row.revoked_at = Some(Utc::now());
                row.replaced_by_session_id = replaced_by.map(str::to_string);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn revoke_family(&self, family_id: &str) -> Result<u64> {
        let mut rows = self.rows.lock().expect("session store mutex poisoned");
        let mut count = 0;
        for row in rows
            .iter_mut()
            .filter(|s| s.family_id == family_id && !s.revoked)
        {
            row.revoked = true;
            row.revoked_at = Some(Utc::now());
            count += 1;
        }
        Ok(count)
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let mut rows = self.rows.lock().expect("session store mutex poisoned");
        if let Some(row) = rows.iter_mut().find(|s| s.session_id == session_id) {
            row.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().expect("session store mutex poisoned");
        let before = rows.len();
        rows.retain(|s| s.expires_at >= now);
        Ok((before - rows.len()) as u64)
    }
}
