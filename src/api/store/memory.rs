//! In-memory implementation of the portal store.
//!
//! Backs the unit and scenario tests so time-sensitive behavior can run
//! against an injected clock instead of a live database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Credential, LoginAttempt, PortalStore};

#[derive(Default)]
struct Inner {
    users: HashMap<String, Credential>,
    session_expiries: HashMap<Uuid, DateTime<Utc>>,
    attempts: Vec<LoginAttempt>,
    settings: HashMap<String, String>,
}

/// Store keeping everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user, keyed by username.
    pub async fn add_user(&self, credential: Credential) {
        let mut inner = self.inner.lock().await;
        inner
            .users
            .insert(credential.username.clone(), credential);
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock().await;
        inner.settings.insert(key.to_string(), value.to_string());
    }

    /// Snapshot of the attempt log, oldest first.
    pub async fn attempts(&self) -> Vec<LoginAttempt> {
        self.inner.lock().await.attempts.clone()
    }

    /// Snapshot of one user's credential record.
    pub async fn credential(&self, username: &str) -> Option<Credential> {
        self.inner.lock().await.users.get(username).cloned()
    }
}

#[async_trait]
impl PortalStore for MemoryStore {
    async fn credential_by_username(&self, username: &str) -> Result<Option<Credential>> {
        Ok(self.inner.lock().await.users.get(username).cloned())
    }

    async fn lock_account_if_threshold(
        &self,
        username: &str,
        max_attempts: i64,
        window_start: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let failures = count_failures(&inner.attempts, username, window_start);
        if failures < max_attempts {
            return Ok(false);
        }
        let Some(user) = inner.users.get_mut(username) else {
            // Attempts against unknown usernames have no row to lock.
            return Ok(false);
        };
        user.account_locked = true;
        user.locked_until = Some(locked_until);
        Ok(true)
    }

    async fn update_session_expiry(
        &self,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match expires_at {
            Some(expires_at) => {
                inner.session_expiries.insert(user_id, expires_at);
            }
            None => {
                inner.session_expiries.remove(&user_id);
            }
        }
        Ok(())
    }

    async fn session_expiry(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self.inner.lock().await.session_expiries.get(&user_id).copied())
    }

    async fn append_login_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        self.inner.lock().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn count_recent_failed_attempts(
        &self,
        username: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(count_failures(&inner.attempts, username, window_start))
    }

    async fn delete_stale_attempts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.attempts.len();
        inner.attempts.retain(|attempt| attempt.attempt_time >= cutoff);
        Ok((before - inner.attempts.len()) as u64)
    }

    async fn read_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.settings.get(key).cloned())
    }
}

fn count_failures(attempts: &[LoginAttempt], username: &str, window_start: DateTime<Utc>) -> i64 {
    attempts
        .iter()
        .filter(|attempt| {
            attempt.username == username
                && !attempt.successful
                && attempt.attempt_time > window_start
        })
        .count() as i64
}

#[cfg(test)]
mod tests {
    use super::super::{LoginAttempt, PortalStore, RegistrationStatus, Role};
    use super::MemoryStore;
    use anyhow::Result;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn attempt(username: &str, successful: bool, at: chrono::DateTime<Utc>) -> LoginAttempt {
        LoginAttempt {
            username: username.to_string(),
            ip_address: Some("203.0.113.7".to_string()),
            successful,
            attempt_time: at,
        }
    }

    #[tokio::test]
    async fn counts_only_failures_inside_window() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .append_login_attempt(&attempt("nina", false, now - Duration::minutes(20)))
            .await?;
        store
            .append_login_attempt(&attempt("nina", false, now - Duration::minutes(5)))
            .await?;
        store
            .append_login_attempt(&attempt("nina", true, now - Duration::minutes(3)))
            .await?;
        store
            .append_login_attempt(&attempt("other", false, now - Duration::minutes(1)))
            .await?;

        let count = store
            .count_recent_failed_attempts("nina", now - Duration::minutes(15))
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn conditional_lock_needs_threshold_and_user() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .add_user(super::super::Credential {
                user_id: Uuid::new_v4(),
                username: "nina".to_string(),
                password_hash: String::new(),
                full_name: "Nina Reyes".to_string(),
                role: Role::Student,
                account_locked: false,
                locked_until: None,
                registration_status: RegistrationStatus::Approved,
                is_active: true,
            })
            .await;

        for minutes in 0..3 {
            store
                .append_login_attempt(&attempt("nina", false, now - Duration::minutes(minutes)))
                .await?;
        }

        let window_start = now - Duration::minutes(15);
        let locked_until = now + Duration::minutes(15);

        // Below threshold: no lock.
        assert!(
            !store
                .lock_account_if_threshold("nina", 5, window_start, locked_until)
                .await?
        );

        for minutes in 3..5 {
            store
                .append_login_attempt(&attempt("nina", false, now - Duration::minutes(minutes)))
                .await?;
        }

        assert!(
            store
                .lock_account_if_threshold("nina", 5, window_start, locked_until)
                .await?
        );
        let locked = store.credential("nina").await.map(|c| c.account_locked);
        assert_eq!(locked, Some(true));

        // No user row means nothing to lock, even past the threshold.
        for minutes in 0..5 {
            store
                .append_login_attempt(&attempt("ghost", false, now - Duration::minutes(minutes)))
                .await?;
        }
        assert!(
            !store
                .lock_account_if_threshold("ghost", 5, window_start, locked_until)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn stale_attempts_get_pruned() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .append_login_attempt(&attempt("nina", false, now - Duration::hours(25)))
            .await?;
        store
            .append_login_attempt(&attempt("nina", false, now - Duration::hours(1)))
            .await?;

        let removed = store.delete_stale_attempts(now - Duration::hours(24)).await?;
        assert_eq!(removed, 1);
        assert_eq!(store.attempts().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn session_expiry_round_trip_and_revoke() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(30);

        assert_eq!(store.session_expiry(user_id).await?, None);

        store.update_session_expiry(user_id, Some(expires)).await?;
        assert_eq!(store.session_expiry(user_id).await?, Some(expires));

        store.update_session_expiry(user_id, None).await?;
        assert_eq!(store.session_expiry(user_id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn settings_read_back() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.read_setting("max_login_attempts").await?, None);

        store.set_setting("max_login_attempts", "3").await;
        assert_eq!(
            store.read_setting("max_login_attempts").await?,
            Some("3".to_string())
        );
        Ok(())
    }
}
