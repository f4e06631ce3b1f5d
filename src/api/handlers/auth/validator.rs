//! Session validator: the per-request check sequence for authenticated pages.
//!
//! Checks run in a fixed order, cheapest first: presence, revalidation
//! short-circuit, client binding, fingerprint, absolute lifetime, idle
//! expiry, then the persisted expiry mirror. Any failure from the binding
//! step onward destroys the session outright; there is no partial recovery.
//! A session that survives everything with less than the renewal threshold
//! left gets its idle window extended, clamped to the absolute cap.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, warn};

use super::client::ClientInfo;
use super::registry::SessionState;
use super::state::{absolute_session_lifetime, renewal_threshold, revalidation_interval, AuthState};
use crate::api::store::Role;

/// Why a session was refused. The `Display` text is carried verbatim in
/// the redirect back to the login page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionRejection {
    #[error("Please log in to continue.")]
    NoSession,

    #[error("Your session has expired due to inactivity. Please log in again.")]
    ExpiredIdle,

    #[error("Your session has reached its maximum duration. Please log in again.")]
    ExpiredAbsolute,

    #[error("Session security check failed. Please log in again.")]
    FingerprintMismatch,

    #[error("Your session was ended. Please log in again.")]
    Revoked,
}

/// Result of validating one request's session token.
#[derive(Debug)]
pub enum Validation {
    Active(SessionState),
    /// The role (when known) picks which login page the redirect targets.
    Rejected {
        rejection: SessionRejection,
        role: Option<Role>,
    },
}

/// Validate the session behind `token_hash` for a request from `client`.
pub(super) async fn validate_session(
    state: &AuthState,
    token_hash: &[u8],
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> Validation {
    let Some(mut session) = state.sessions().get(token_hash).await else {
        return Validation::Rejected {
            rejection: SessionRejection::NoSession,
            role: None,
        };
    };
    let role = Some(session.role);

    if !session.logged_in {
        destroy_session(state, token_hash).await;
        return Validation::Rejected {
            rejection: SessionRejection::NoSession,
            role,
        };
    }

    // A page that fires several asset requests at once should not pay for
    // (or race) the full sequence every time.
    if now - session.last_validation < revalidation_interval() {
        return Validation::Active(session);
    }
    session.last_validation = now;

    if let Some(bound) = &session.client {
        if bound.ip != client.ip || bound.user_agent != client.user_agent {
            warn!(
                "Session client changed for {}: bound {:?}/{:?}, got {:?}/{:?}",
                session.username, bound.ip, bound.user_agent, client.ip, client.user_agent
            );
            destroy_session(state, token_hash).await;
            return Validation::Rejected {
                rejection: SessionRejection::FingerprintMismatch,
                role,
            };
        }
    } else {
        // Session predates binding (issued before the client was seen);
        // adopt this client as the canonical one.
        session.client = Some(client.clone());
        session.fingerprint = Some(client.fingerprint());
    }

    let expected = client.fingerprint();
    if session.fingerprint.as_deref() != Some(expected.as_slice()) {
        warn!("Session fingerprint mismatch for {}", session.username);
        destroy_session(state, token_hash).await;
        return Validation::Rejected {
            rejection: SessionRejection::FingerprintMismatch,
            role,
        };
    }

    if now - session.created_at > absolute_session_lifetime() {
        destroy_session(state, token_hash).await;
        return Validation::Rejected {
            rejection: SessionRejection::ExpiredAbsolute,
            role,
        };
    }

    if now > session.expires_at {
        destroy_session(state, token_hash).await;
        return Validation::Rejected {
            rejection: SessionRejection::ExpiredIdle,
            role,
        };
    }

    // The persisted mirror is how an administrator force-ends a session
    // from outside this process. Unreadable counts the same as revoked.
    match state.store().session_expiry(session.user_id).await {
        Ok(Some(expiry)) if expiry > now => {}
        Ok(_) => {
            destroy_session(state, token_hash).await;
            return Validation::Rejected {
                rejection: SessionRejection::Revoked,
                role,
            };
        }
        Err(err) => {
            error!(
                "Failed to read session expiry for {}: {err}",
                session.username
            );
            destroy_session(state, token_hash).await;
            return Validation::Rejected {
                rejection: SessionRejection::Revoked,
                role,
            };
        }
    }

    if session.expires_at - now < renewal_threshold() {
        let renewed = (now + state.config().session_timeout()).min(session.absolute_deadline());
        session.expires_at = renewed;
        if let Err(err) = state
            .store()
            .update_session_expiry(session.user_id, Some(renewed))
            .await
        {
            // The in-memory window still moves; worst case the mirror
            // revokes the session a little early.
            error!(
                "Failed to persist session renewal for {}: {err}",
                session.username
            );
        }
    }

    state.sessions().refresh(token_hash, session.clone()).await;
    Validation::Active(session)
}

/// Drop the session from the registry and clear its persisted mirror.
pub(super) async fn destroy_session(state: &AuthState, token_hash: &[u8]) {
    let Some(session) = state.sessions().remove(token_hash).await else {
        return;
    };
    if let Err(err) = state
        .store()
        .update_session_expiry(session.user_id, None)
        .await
    {
        error!(
            "Failed to clear session expiry for {}: {err}",
            session.username
        );
    }
}
