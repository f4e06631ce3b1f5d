use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::registry::SessionState;
use crate::api::store::Role;

/// Credentials posted to `/v1/auth/login`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "jdelacruz")]
    pub username: String,

    /// Never logged, never echoed back.
    #[schema(value_type = String, format = Password, example = "hunter2hunter2")]
    pub password: SecretString,
}

/// Session description returned by `/v1/auth/login` and `/v1/auth/session`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(example = "0193cd1f-3f0c-7f3b-a6c5-2f7a9a3a9c11")]
    pub user_id: String,

    #[schema(example = "jdelacruz")]
    pub username: String,

    #[schema(example = "Juan de la Cruz")]
    pub full_name: String,

    pub role: Role,

    /// RFC 3339 timestamp after which the session idles out.
    #[schema(example = "2025-06-01T12:30:00Z")]
    pub expires_at: String,
}

impl From<&SessionState> for SessionResponse {
    fn from(session: &SessionState) -> Self {
        Self {
            user_id: session.user_id.to_string(),
            username: session.username.clone(),
            full_name: session.full_name.clone(),
            role: session.role,
            expires_at: session.expires_at.to_rfc3339(),
        }
    }
}
