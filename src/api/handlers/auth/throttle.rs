//! Login throttle: rolling-window failure counting and account lockout.
//!
//! Every attempt walks the same ladder before the password is ever checked:
//! purge stale log rows, look up the credential, reject locked accounts, and
//! apply the lockout when the window already holds too many failures. Only
//! then does Argon2 verification run, followed by the registration-status
//! gates. Every decision leaves a row in the attempt log.

use anyhow::Result;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, error};

use super::state::{attempt_retention, AuthConfig};
use crate::api::store::{Credential, LoginAttempt, PortalStore, RegistrationStatus};

/// Reasons a login attempt is refused. The `Display` text is what the
/// portal shows the user, so keep it free of anything an attacker could
/// use to tell accounts apart.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginDenial {
    #[error("Invalid username or password. {remaining} attempt(s) remaining.")]
    InvalidCredentials { remaining: i64 },

    #[error("Account locked due to too many failed attempts. Try again in {minutes_remaining} minute(s).")]
    Locked { minutes_remaining: i64 },

    #[error("Your registration is awaiting approval.")]
    PendingApproval,

    #[error("This account has been disabled.")]
    Inactive,
}

/// Outcome of a throttled login attempt.
#[derive(Debug)]
pub enum LoginOutcome {
    Granted(Credential),
    Denied(LoginDenial),
}

/// Borrow-only view over the store and config for one login attempt.
pub(super) struct LoginThrottle<'a> {
    store: &'a dyn PortalStore,
    config: &'a AuthConfig,
}

impl<'a> LoginThrottle<'a> {
    pub(super) fn new(store: &'a dyn PortalStore, config: &'a AuthConfig) -> Self {
        Self { store, config }
    }

    /// Run one login attempt through the throttle.
    ///
    /// # Errors
    /// Returns an error when the credential lookup or the failure count
    /// cannot be read. Attempt logging and lock updates are deliberately
    /// not fatal: a flaky log write must not block a legitimate login.
    pub(super) async fn check(
        &self,
        username: &str,
        password: &SecretString,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome> {
        self.purge_stale_attempts(now).await;

        let Some(credential) = self.store.credential_by_username(username).await? else {
            // Unknown usernames get the exact same response shape as a wrong
            // password so the login form cannot be used to enumerate accounts.
            self.record_attempt(username, ip, false, now).await;
            let remaining = self.remaining_attempts(username, now).await?;
            return Ok(LoginOutcome::Denied(LoginDenial::InvalidCredentials {
                remaining,
            }));
        };

        if credential.is_locked(now) {
            self.record_attempt(username, ip, false, now).await;
            let minutes_remaining = credential
                .locked_until
                .map_or(0, |until| minutes_until(until, now));
            return Ok(LoginOutcome::Denied(LoginDenial::Locked { minutes_remaining }));
        }

        if self.apply_lockout(username, now).await {
            self.record_attempt(username, ip, false, now).await;
            return Ok(LoginOutcome::Denied(LoginDenial::Locked {
                minutes_remaining: self.config.lockout_duration_minutes(),
            }));
        }

        if !self.password_matches(&credential, password) {
            self.record_attempt(username, ip, false, now).await;
            let remaining = self.remaining_attempts(username, now).await?;
            return Ok(LoginOutcome::Denied(LoginDenial::InvalidCredentials {
                remaining,
            }));
        }

        // Correct password, but the account may not be usable yet (or any
        // more). These still count as failed attempts so a shared password
        // cannot be hammered against a pending account for free.
        if credential.registration_status == RegistrationStatus::Pending {
            self.record_attempt(username, ip, false, now).await;
            return Ok(LoginOutcome::Denied(LoginDenial::PendingApproval));
        }

        if !credential.is_active {
            self.record_attempt(username, ip, false, now).await;
            return Ok(LoginOutcome::Denied(LoginDenial::Inactive));
        }

        self.record_attempt(username, ip, true, now).await;
        Ok(LoginOutcome::Granted(credential))
    }

    /// Apply the lockout when the rolling window already holds `max_login_attempts`
    /// failures. The comparison and the flag update happen in a single store
    /// operation so two racing attempts cannot both slip past the threshold.
    async fn apply_lockout(&self, username: &str, now: DateTime<Utc>) -> bool {
        let window_start = now - self.config.attempt_window();
        let locked_until = now + self.config.lockout_duration();
        match self
            .store
            .lock_account_if_threshold(
                username,
                self.config.max_login_attempts(),
                window_start,
                locked_until,
            )
            .await
        {
            Ok(locked) => locked,
            Err(err) => {
                error!("Failed to apply lockout for {username}: {err}");
                false
            }
        }
    }

    fn password_matches(&self, credential: &Credential, password: &SecretString) -> bool {
        let parsed = match PasswordHash::new(&credential.password_hash) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(
                    "Stored password hash for {} is unreadable: {err}",
                    credential.username
                );
                return false;
            }
        };
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }

    /// Attempts left before the lockout threshold, counting the failure that
    /// was just recorded.
    async fn remaining_attempts(&self, username: &str, now: DateTime<Utc>) -> Result<i64> {
        let window_start = now - self.config.attempt_window();
        let failures = self
            .store
            .count_recent_failed_attempts(username, window_start)
            .await?;
        Ok((self.config.max_login_attempts() - failures).max(0))
    }

    async fn record_attempt(
        &self,
        username: &str,
        ip: Option<&str>,
        successful: bool,
        now: DateTime<Utc>,
    ) {
        let attempt = LoginAttempt {
            username: username.to_string(),
            ip_address: ip.map(str::to_string),
            successful,
            attempt_time: now,
        };
        if let Err(err) = self.store.append_login_attempt(&attempt).await {
            error!("Failed to record login attempt for {username}: {err}");
        }
    }

    /// Drop attempt rows past the retention horizon. Piggybacks on login
    /// traffic instead of a scheduled job, so failures only get logged.
    async fn purge_stale_attempts(&self, now: DateTime<Utc>) {
        match self.store.delete_stale_attempts(now - attempt_retention()).await {
            Ok(0) => {}
            Ok(removed) => debug!("Purged {removed} stale login attempts"),
            Err(err) => error!("Failed to purge stale login attempts: {err}"),
        }
    }
}

/// Whole minutes until `locked_until`, rounded up so "1 minute" never
/// means "already expired".
fn minutes_until(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (locked_until - now).num_seconds().max(0);
    (seconds + 59) / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::store::{MemoryStore, Role};
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    use chrono::Duration;
    use uuid::Uuid;

    fn hash_password(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .expect("hashing failed")
            .to_string()
    }

    fn credential(username: &str, password: &str) -> Credential {
        Credential {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: hash_password(password),
            full_name: "Test User".to_string(),
            role: Role::Student,
            account_locked: false,
            locked_until: None,
            registration_status: RegistrationStatus::Approved,
            is_active: true,
        }
    }

    fn secret(password: &str) -> SecretString {
        SecretString::from(password.to_string())
    }

    fn config() -> AuthConfig {
        AuthConfig::new("http://localhost:3000".to_string())
    }

    #[tokio::test]
    async fn correct_password_is_granted_and_logged() -> Result<()> {
        let store = MemoryStore::new();
        store.add_user(credential("nina", "correct horse")).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);

        let now = Utc::now();
        let outcome = throttle
            .check("nina", &secret("correct horse"), Some("203.0.113.7"), now)
            .await?;

        assert!(matches!(outcome, LoginOutcome::Granted(ref c) if c.username == "nina"));
        let attempts = store.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].successful);
        assert_eq!(attempts[0].ip_address.as_deref(), Some("203.0.113.7"));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_counts_down_remaining() -> Result<()> {
        let store = MemoryStore::new();
        store.add_user(credential("nina", "correct horse")).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);
        let now = Utc::now();

        let outcome = throttle.check("nina", &secret("nope"), None, now).await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::InvalidCredentials { remaining: 4 })
        ));

        let outcome = throttle
            .check("nina", &secret("nope"), None, now + Duration::seconds(1))
            .await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::InvalidCredentials { remaining: 3 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_username_mirrors_wrong_password() -> Result<()> {
        let store = MemoryStore::new();
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);
        let now = Utc::now();

        let outcome = throttle.check("ghost", &secret("whatever"), None, now).await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::InvalidCredentials { remaining: 4 })
        ));
        // The attempt is still logged even though no such user exists.
        let attempts = store.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].successful);
        Ok(())
    }

    #[tokio::test]
    async fn fifth_failure_exhausts_window_then_lock_engages() -> Result<()> {
        let store = MemoryStore::new();
        store.add_user(credential("alice", "correct horse")).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);
        let start = Utc::now();

        for attempt in 0..5 {
            let now = start + Duration::seconds(attempt);
            let outcome = throttle.check("alice", &secret("wrong"), None, now).await?;
            let expected_remaining = 5 - (attempt + 1);
            assert!(
                matches!(
                    outcome,
                    LoginOutcome::Denied(LoginDenial::InvalidCredentials { remaining })
                        if remaining == expected_remaining
                ),
                "attempt {attempt} should leave {expected_remaining} remaining"
            );
        }

        // Even the correct password bounces now: the window holds five
        // failures, so the lock engages before verification.
        let now = start + Duration::seconds(10);
        let outcome = throttle
            .check("alice", &secret("correct horse"), None, now)
            .await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::Locked {
                minutes_remaining: 15
            })
        ));
        let locked = store.credential("alice").await;
        assert_eq!(locked.as_ref().map(|c| c.account_locked), Some(true));
        assert!(locked.and_then(|c| c.locked_until).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn locked_account_rejects_without_password_check() -> Result<()> {
        let store = MemoryStore::new();
        let mut user = credential("alice", "correct horse");
        let now = Utc::now();
        user.account_locked = true;
        user.locked_until = Some(now + Duration::minutes(10));
        store.add_user(user).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);

        let outcome = throttle
            .check("alice", &secret("correct horse"), None, now)
            .await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::Locked {
                minutes_remaining: 10
            })
        ));
        // The refused attempt still lands in the log.
        assert_eq!(store.attempts().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn expired_lock_clears_on_next_attempt() -> Result<()> {
        let store = MemoryStore::new();
        let mut user = credential("alice", "correct horse");
        let now = Utc::now();
        user.account_locked = true;
        user.locked_until = Some(now - Duration::minutes(1));
        store.add_user(user).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);

        // Lock window has passed and the failure window is empty, so the
        // stale account_locked flag no longer blocks the login.
        let outcome = throttle
            .check("alice", &secret("correct horse"), None, now)
            .await?;
        assert!(matches!(outcome, LoginOutcome::Granted(_)));
        Ok(())
    }

    #[tokio::test]
    async fn old_failures_age_out_of_the_window() -> Result<()> {
        let store = MemoryStore::new();
        store.add_user(credential("nina", "correct horse")).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);
        let start = Utc::now();

        for attempt in 0..4 {
            throttle
                .check("nina", &secret("wrong"), None, start + Duration::seconds(attempt))
                .await?;
        }

        // Sixteen minutes later those four failures are outside the window.
        let later = start + Duration::minutes(16);
        let outcome = throttle.check("nina", &secret("wrong"), None, later).await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::InvalidCredentials { remaining: 4 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn pending_and_inactive_accounts_are_refused() -> Result<()> {
        let store = MemoryStore::new();
        let mut pending = credential("pending", "correct horse");
        pending.registration_status = RegistrationStatus::Pending;
        store.add_user(pending).await;
        let mut disabled = credential("disabled", "correct horse");
        disabled.is_active = false;
        store.add_user(disabled).await;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);
        let now = Utc::now();

        let outcome = throttle
            .check("pending", &secret("correct horse"), None, now)
            .await?;
        assert!(matches!(
            outcome,
            LoginOutcome::Denied(LoginDenial::PendingApproval)
        ));

        let outcome = throttle
            .check("disabled", &secret("correct horse"), None, now)
            .await?;
        assert!(matches!(outcome, LoginOutcome::Denied(LoginDenial::Inactive)));

        // Both count as failures in the attempt log.
        let attempts = store.attempts().await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| !a.successful));
        Ok(())
    }

    #[tokio::test]
    async fn purge_runs_before_the_ladder() -> Result<()> {
        let store = MemoryStore::new();
        store.add_user(credential("nina", "correct horse")).await;
        let now = Utc::now();
        store
            .append_login_attempt(&LoginAttempt {
                username: "nina".to_string(),
                ip_address: None,
                successful: false,
                attempt_time: now - Duration::hours(25),
            })
            .await?;
        let config = config();
        let throttle = LoginThrottle::new(&store, &config);

        throttle
            .check("nina", &secret("correct horse"), None, now)
            .await?;

        let attempts = store.attempts().await;
        assert_eq!(attempts.len(), 1, "stale row should be gone");
        assert!(attempts[0].successful);
        Ok(())
    }

    #[test]
    fn minutes_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(minutes_until(now + Duration::seconds(61), now), 2);
        assert_eq!(minutes_until(now + Duration::minutes(15), now), 15);
        assert_eq!(minutes_until(now - Duration::seconds(5), now), 0);
    }

    #[test]
    fn denial_messages_read_like_the_portal() {
        assert_eq!(
            LoginDenial::InvalidCredentials { remaining: 2 }.to_string(),
            "Invalid username or password. 2 attempt(s) remaining."
        );
        assert_eq!(
            LoginDenial::Locked {
                minutes_remaining: 15
            }
            .to_string(),
            "Account locked due to too many failed attempts. Try again in 15 minute(s)."
        );
    }
}
