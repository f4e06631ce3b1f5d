//! Runtime configuration and shared state for the auth surface.

use anyhow::{Context, Result};
use chrono::Duration;
use std::sync::Arc;
use tracing::warn;

use super::registry::SessionRegistry;
use crate::api::store::{
    PortalStore, SETTING_LOCKOUT_DURATION, SETTING_MAX_LOGIN_ATTEMPTS, SETTING_SESSION_TIMEOUT,
};

const DEFAULT_MAX_LOGIN_ATTEMPTS: i64 = 5;
const DEFAULT_LOCKOUT_DURATION_MINUTES: i64 = 15;
const DEFAULT_ATTEMPT_WINDOW_MINUTES: i64 = 15;
const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

const ABSOLUTE_SESSION_LIFETIME_HOURS: i64 = 12;
const RENEWAL_THRESHOLD_MINUTES: i64 = 5;
const REVALIDATION_INTERVAL_SECONDS: i64 = 1;
const ATTEMPT_RETENTION_HOURS: i64 = 24;

/// Hard cap on session lifetime regardless of renewals.
pub(super) fn absolute_session_lifetime() -> Duration {
    Duration::hours(ABSOLUTE_SESSION_LIFETIME_HOURS)
}

/// Renew the idle window once less than this remains.
pub(super) fn renewal_threshold() -> Duration {
    Duration::minutes(RENEWAL_THRESHOLD_MINUTES)
}

/// Repeat validations inside this interval skip the full check sequence.
pub(super) fn revalidation_interval() -> Duration {
    Duration::seconds(REVALIDATION_INTERVAL_SECONDS)
}

/// Attempt-log rows older than this are purged opportunistically.
pub(super) fn attempt_retention() -> Duration {
    Duration::hours(ATTEMPT_RETENTION_HOURS)
}

/// Tunables for the login throttle and session validator.
///
/// Built-in defaults first, then `with_*` overrides, then whatever the
/// `portal_settings` table says via [`AuthConfig::load_settings`] (fetched
/// once at startup, not per call).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    portal_base_url: String,
    max_login_attempts: i64,
    lockout_duration_minutes: i64,
    attempt_window_minutes: i64,
    session_timeout_minutes: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(portal_base_url: String) -> Self {
        Self {
            portal_base_url,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            lockout_duration_minutes: DEFAULT_LOCKOUT_DURATION_MINUTES,
            attempt_window_minutes: DEFAULT_ATTEMPT_WINDOW_MINUTES,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
        }
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: i64) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_duration_minutes(mut self, minutes: i64) -> Self {
        self.lockout_duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_attempt_window_minutes(mut self, minutes: i64) -> Self {
        self.attempt_window_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_session_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_timeout_minutes = minutes;
        self
    }

    /// Overlay the persisted portal settings on top of the current values.
    ///
    /// Malformed values keep the current setting and log a warning; the
    /// coordinator fixing a typo in the admin panel should not take the
    /// portal down.
    ///
    /// # Errors
    /// Returns an error when the settings table cannot be read at all.
    pub async fn load_settings(mut self, store: &dyn PortalStore) -> Result<Self> {
        if let Some(value) = read_int_setting(store, SETTING_MAX_LOGIN_ATTEMPTS).await? {
            self.max_login_attempts = value;
        }
        if let Some(value) = read_int_setting(store, SETTING_LOCKOUT_DURATION).await? {
            self.lockout_duration_minutes = value;
        }
        if let Some(value) = read_int_setting(store, SETTING_SESSION_TIMEOUT).await? {
            self.session_timeout_minutes = value;
        }
        Ok(self)
    }

    pub(crate) fn portal_base_url(&self) -> &str {
        &self.portal_base_url
    }

    pub(super) fn max_login_attempts(&self) -> i64 {
        self.max_login_attempts
    }

    pub(super) fn lockout_duration(&self) -> Duration {
        Duration::minutes(self.lockout_duration_minutes)
    }

    pub(super) fn lockout_duration_minutes(&self) -> i64 {
        self.lockout_duration_minutes
    }

    pub(super) fn attempt_window(&self) -> Duration {
        Duration::minutes(self.attempt_window_minutes)
    }

    pub(super) fn session_timeout(&self) -> Duration {
        Duration::minutes(self.session_timeout_minutes)
    }

    /// Only mark cookies secure when the portal is served over HTTPS.
    pub(super) fn session_cookie_secure(&self) -> bool {
        self.portal_base_url.starts_with("https://")
    }
}

async fn read_int_setting(store: &dyn PortalStore, key: &str) -> Result<Option<i64>> {
    let value = store
        .read_setting(key)
        .await
        .with_context(|| format!("failed to load portal setting {key}"))?;
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
        _ => {
            warn!("Ignoring malformed portal setting {key}={value}");
            Ok(None)
        }
    }
}

/// Shared state handed to every auth handler via `Extension`.
pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn PortalStore>,
    sessions: SessionRegistry,
}

impl AuthState {
    pub fn new(config: AuthConfig, store: Arc<dyn PortalStore>) -> Self {
        Self {
            config,
            store,
            sessions: SessionRegistry::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn PortalStore {
        self.store.as_ref()
    }

    pub(super) fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}
