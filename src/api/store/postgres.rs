//! `PostgreSQL` implementation of the portal store.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{Credential, LoginAttempt, PortalStore, RegistrationStatus, Role};

/// Store backed by the portal's `PostgreSQL` database.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortalStore for PgStore {
    async fn credential_by_username(&self, username: &str) -> Result<Option<Credential>> {
        let query = r"
            SELECT id, username, password_hash, full_name, role,
                   account_locked, locked_until, registration_status, is_active
            FROM users
            WHERE username = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup credential")?;

        row.map(|row| {
            let role: String = row.get("role");
            let role =
                Role::parse(&role).ok_or_else(|| anyhow!("unknown role in users table: {role}"))?;
            let status: String = row.get("registration_status");
            let registration_status = RegistrationStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown registration status: {status}"))?;
            Ok(Credential {
                user_id: row.get("id"),
                username: row.get("username"),
                password_hash: row.get("password_hash"),
                full_name: row.get("full_name"),
                role,
                account_locked: row.get("account_locked"),
                locked_until: row.get("locked_until"),
                registration_status,
                is_active: row.get("is_active"),
            })
        })
        .transpose()
    }

    async fn lock_account_if_threshold(
        &self,
        username: &str,
        max_attempts: i64,
        window_start: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool> {
        // The failure count is evaluated inside the UPDATE so the
        // check-and-lock pair cannot interleave with a concurrent login.
        let query = r"
            UPDATE users
            SET account_locked = TRUE, locked_until = $4
            WHERE username = $1
              AND (
                  SELECT COUNT(*)
                  FROM login_attempts
                  WHERE username = $1
                    AND successful = FALSE
                    AND attempt_time > $2
              ) >= $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(username)
            .bind(window_start)
            .bind(max_attempts)
            .bind(locked_until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply conditional account lock")?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_session_expiry(
        &self,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let query = "UPDATE users SET session_expires_at = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update session expiry")?;
        Ok(())
    }

    async fn session_expiry(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let query = "SELECT session_expires_at FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read session expiry")?;

        // A deleted user reads as no expiry; the validator fails closed on it.
        Ok(row.and_then(|row| row.get("session_expires_at")))
    }

    async fn append_login_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (username, ip_address, successful, attempt_time)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&attempt.username)
            .bind(attempt.ip_address.as_deref())
            .bind(attempt.successful)
            .bind(attempt.attempt_time)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to append login attempt")?;
        Ok(())
    }

    async fn count_recent_failed_attempts(
        &self,
        username: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        let query = r"
            SELECT COUNT(*)
            FROM login_attempts
            WHERE username = $1
              AND successful = FALSE
              AND attempt_time > $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(window_start)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count recent failed attempts")?;
        Ok(row.get(0))
    }

    async fn delete_stale_attempts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM login_attempts WHERE attempt_time < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete stale login attempts")?;
        Ok(result.rows_affected())
    }

    async fn read_setting(&self, key: &str) -> Result<Option<String>> {
        let query = "SELECT setting_value FROM portal_settings WHERE setting_key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read portal setting")?;
        Ok(row.map(|row| row.get("setting_value")))
    }
}
