//! PostgreSQL-backed session store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::{hash_refresh_token, NewSession, Session, SessionStore};

/// Column list shared across queries; username/role are joined from users.
const SESSION_COLUMNS: &str = "s.id, s.session_id, s.family_id, s.user_id, u.username, u.role, \
     s.refresh_token_hash, s.expires_at, s.revoked, s.revoked_at, \
     s.replaced_by_session_id, s.created_at, s.last_used_at, s.client_ip, s.user_agent";

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Session {
    Session {
        id: row.get("id"),
        session_id: row.get("session_id"),
        family_id: row.get("family_id"),
        user_id: row.get("user_id"),
        username: row.get("username"),
        role: row.get("role"),
        refresh_token_hash: row.get("refresh_token_hash"),
        expires_at: row.get("expires_at"),
        revoked: row.get("revoked"),
        revoked_at: row.get("revoked_at"),
        replaced_by_session_id: row.get("replaced_by_session_id"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
        client_ip: row.get("client_ip"),
        user_agent: row.get("user_agent"),
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, input: NewSession) -> Result<Session> {
        let token_hash = hash_refresh_token(&input.refresh_token);
        let query = r"
            INSERT INTO user_sessions
                (user_id, session_id, family_id, refresh_token_hash, expires_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(input.user_id)
            .bind(&input.session_id)
            .bind(&input.family_id)
            .bind(&token_hash)
            .bind(input.expires_at)
            .bind(&input.client_ip)
            .bind(&input.user_agent)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;

        Ok(Session {
            id: row.get("id"),
            session_id: input.session_id,
            family_id: input.family_id,
            user_id: input.user_id,
            username: input.username,
            role: input.role,
            refresh_token_hash: token_hash,
            expires_at: input.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by_session_id: None,
            created_at: row.get("created_at"),
            last_used_at: None,
            client_ip: input.client_ip,
            user_agent: input.user_agent,
        })
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS}
             FROM user_sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.session_id = $1"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn revoke_session(&self, session_id: &str, replaced_by: Option<&str>) -> Result<u64> {
        // The `revoked = false` guard makes this a compare-and-swap: exactly
        // one of two racing callers sees rows_affected = 1.
        let query = r"
            UPDATE user_sessions
            SET revoked = true, revoked_at = NOW(), replaced_by_session_id = $2
            WHERE session_id = $1 AND revoked = false
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(replaced_by)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session")?;
        Ok(result.rows_affected())
    }

    async fn revoke_family(&self, family_id: &str) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET revoked = true, revoked_at = NOW()
            WHERE family_id = $1 AND revoked = false
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(family_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session family")?;
        Ok(result.rows_affected())
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let query = "UPDATE user_sessions SET last_used_at = NOW() WHERE session_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch session")?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE expires_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}
