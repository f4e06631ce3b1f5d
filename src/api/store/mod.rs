//! Persistence seam for credentials, login attempts, and portal settings.
//!
//! The throttle and the session validator never touch `sqlx` directly; they
//! talk to [`PortalStore`] so the same logic runs against `PostgreSQL` in
//! production and against [`memory::MemoryStore`] in tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Recognized keys in the `portal_settings` table.
pub const SETTING_MAX_LOGIN_ATTEMPTS: &str = "max_login_attempts";
pub const SETTING_LOCKOUT_DURATION: &str = "lockout_duration";
pub const SETTING_SESSION_TIMEOUT: &str = "session_timeout";

/// Portal roles, stored lowercase in the `users.role` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Adviser,
    Panel,
    Admin,
}

impl Role {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Self::Student),
            "adviser" => Some(Self::Adviser),
            "panel" => Some(Self::Panel),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Login page the portal shows after a session ends for this role.
    #[must_use]
    pub fn login_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin/login",
            Self::Student | Self::Adviser | Self::Panel => "/login",
        }
    }
}

/// Whether an account has been approved by the coordinator yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationStatus {
    Pending,
    Approved,
}

impl RegistrationStatus {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// One row from the `users` table, as needed by login and session checks.
#[derive(Clone, Debug)]
pub struct Credential {
    pub user_id: Uuid,
    pub username: String,
    /// Argon2 PHC string; never leaves the store layer in responses.
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub account_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub registration_status: RegistrationStatus,
    pub is_active: bool,
}

impl Credential {
    /// Locked means the flag is set and `locked_until` has not elapsed yet.
    /// An elapsed lock needs no reset write; it simply stops matching here.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.account_locked && self.locked_until.is_some_and(|until| until > now)
    }
}

/// Audit row for a single login attempt, successful or not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub username: String,
    pub ip_address: Option<String>,
    pub successful: bool,
    pub attempt_time: DateTime<Utc>,
}

/// Storage operations behind the login throttle and the session validator.
#[async_trait]
pub trait PortalStore: Send + Sync {
    /// Fetch the credential record for a username, if one exists.
    async fn credential_by_username(&self, username: &str) -> Result<Option<Credential>>;

    /// Lock the account when the window already holds `max_attempts` failures.
    ///
    /// The threshold test runs inside the update statement, so two racing
    /// logins cannot both observe a sub-threshold count and skip the lock.
    /// Returns true when the threshold was met and the lock is in place.
    async fn lock_account_if_threshold(
        &self,
        username: &str,
        max_attempts: i64,
        window_start: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mirror a session expiry for the user; `None` revokes it server-side.
    async fn update_session_expiry(
        &self,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Read the persisted session expiry for the validator cross-check.
    ///
    /// A missing user reads as `None`, which the validator treats as revoked.
    async fn session_expiry(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    /// Append one attempt to the login audit log.
    async fn append_login_attempt(&self, attempt: &LoginAttempt) -> Result<()>;

    /// Count failed attempts for a username newer than `window_start`.
    async fn count_recent_failed_attempts(
        &self,
        username: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64>;

    /// Drop attempt rows older than `cutoff`; returns how many went away.
    async fn delete_stale_attempts(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Read one portal setting; absent keys fall back at the call site.
    async fn read_setting(&self, key: &str) -> Result<Option<String>>;
}
