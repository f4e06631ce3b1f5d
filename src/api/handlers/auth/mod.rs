//! Login throttle and session validation for the submission portal.
//!
//! This module owns the two gates every portal user passes through: the
//! login throttle in front of password verification, and the per-request
//! session validator behind it.
//!
//! ## Login Throttle
//!
//! Failed attempts are counted per username over a rolling window and every
//! attempt is logged with its source IP.
//!
//! - **Attempt Limit:** 5 failures within 15 minutes lock the account.
//! - **Lockout:** 15 minutes, enforced before the password is ever checked.
//! - **Retention:** attempt rows older than 24 hours are purged on login.
//!
//! The limits live in the `portal_settings` table and are read once at
//! startup.
//!
//! ## Session Validator
//!
//! Sessions are process-local, keyed by the SHA-256 hash of the cookie
//! token, and bound to the client fingerprint (user agent, IP, accept
//! language). Validation checks presence, fingerprint, a 12-hour absolute
//! lifetime, and the idle window, then compares against the persisted
//! expiry mirror so administrators can revoke sessions from outside the
//! process. Sessions close to idling out are renewed in place.

pub(crate) mod client;
pub(crate) mod login;
mod registry;
pub(crate) mod session;
mod state;
mod throttle;
pub(crate) mod types;
mod utils;
mod validator;

pub use state::{AuthConfig, AuthState};
pub use throttle::{LoginDenial, LoginOutcome};
pub use validator::{SessionRejection, Validation};
