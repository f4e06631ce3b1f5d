//! Process-local registry of active sessions.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::client::ClientInfo;
use super::state::absolute_session_lifetime;
use crate::api::store::Role;

/// Everything the server keeps about one authenticated browser session.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub(crate) user_id: Uuid,
    pub(crate) username: String,
    pub(crate) full_name: String,
    pub(crate) role: Role,
    /// Cleared instead of the whole entry being dropped in some teardown
    /// paths; a false flag is treated the same as a missing session.
    pub(crate) logged_in: bool,
    pub(crate) created_at: DateTime<Utc>,
    /// Idle expiry; pushed forward by renewal, never past the absolute cap.
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) last_validation: DateTime<Utc>,
    /// Client seen at login or on the first validated request.
    pub(crate) client: Option<ClientInfo>,
    pub(crate) fingerprint: Option<Vec<u8>>,
}

impl SessionState {
    /// Fresh session for a user who just authenticated.
    pub(crate) fn new(
        user_id: Uuid,
        username: String,
        full_name: String,
        role: Role,
        client: ClientInfo,
        now: DateTime<Utc>,
        idle_window: Duration,
    ) -> Self {
        let fingerprint = client.fingerprint();
        Self {
            user_id,
            username,
            full_name,
            role,
            logged_in: true,
            created_at: now,
            expires_at: now + idle_window,
            last_validation: now,
            client: Some(client),
            fingerprint: Some(fingerprint),
        }
    }

    /// Hard cap: no renewal may push the session past this instant.
    pub(crate) fn absolute_deadline(&self) -> DateTime<Utc> {
        self.created_at + absolute_session_lifetime()
    }
}

/// Sessions keyed by the SHA-256 hash of their token.
///
/// The raw token only ever lives in the client cookie; the registry and the
/// database never see it.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<Vec<u8>, SessionState>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a session, sweeping out entries that are already dead.
    pub(crate) async fn insert(
        &self,
        token_hash: Vec<u8>,
        state: SessionState,
        now: DateTime<Utc>,
    ) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, session| session.expires_at > now && session.absolute_deadline() > now);
        sessions.insert(token_hash, state);
    }

    pub(crate) async fn get(&self, token_hash: &[u8]) -> Option<SessionState> {
        self.sessions.lock().await.get(token_hash).cloned()
    }

    /// Write back a validated session. No-op when it was removed mid-request;
    /// a concurrent logout must not be resurrected.
    pub(crate) async fn refresh(&self, token_hash: &[u8], state: SessionState) {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get_mut(token_hash) {
            *slot = state;
        }
    }

    pub(crate) async fn remove(&self, token_hash: &[u8]) -> Option<SessionState> {
        self.sessions.lock().await.remove(token_hash)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
