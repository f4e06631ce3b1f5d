//! Login endpoint: throttle check, then session issuance.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    client::ClientInfo,
    registry::SessionState,
    session::session_cookie,
    state::AuthState,
    throttle::{LoginDenial, LoginOutcome, LoginThrottle},
    types::{LoginRequest, SessionResponse},
    utils::{generate_session_token, hash_session_token, valid_username},
};
use crate::api::store::Credential;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded; session cookie set", body = SessionResponse),
        (status = 400, description = "Missing or malformed payload"),
        (status = 401, description = "Invalid username or password"),
        (status = 403, description = "Account not approved or disabled"),
        (status = 423, description = "Account locked by the login throttle"),
        (status = 500, description = "Login could not be processed")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let username = payload.username.trim();
    if !valid_username(username) {
        return (StatusCode::BAD_REQUEST, "Invalid username").into_response();
    }

    let client = ClientInfo::from_headers(&headers);
    let now = Utc::now();
    let throttle = LoginThrottle::new(auth_state.store(), auth_state.config());

    match throttle
        .check(username, &payload.password, client.ip.as_deref(), now)
        .await
    {
        Ok(LoginOutcome::Granted(credential)) => {
            info!("Login succeeded for {username}");
            establish_session(&auth_state, credential, client, now).await
        }
        Ok(LoginOutcome::Denied(denial)) => {
            (denial_status(&denial), denial.to_string()).into_response()
        }
        Err(err) => {
            error!("Login failed for {username}: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed").into_response()
        }
    }
}

fn denial_status(denial: &LoginDenial) -> StatusCode {
    match denial {
        LoginDenial::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
        LoginDenial::Locked { .. } => StatusCode::LOCKED,
        LoginDenial::PendingApproval | LoginDenial::Inactive => StatusCode::FORBIDDEN,
    }
}

/// Mint a token, register the session, and mirror its expiry.
///
/// The mirror write happens before the registry insert and is fatal when it
/// fails: a session the database does not know about could never be revoked
/// by an administrator.
async fn establish_session(
    auth_state: &AuthState,
    credential: Credential,
    client: ClientInfo,
    now: DateTime<Utc>,
) -> Response {
    let token = match generate_session_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to generate session token: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed").into_response();
        }
    };
    let token_hash = hash_session_token(&token);

    let session = SessionState::new(
        credential.user_id,
        credential.username,
        credential.full_name,
        credential.role,
        client,
        now,
        auth_state.config().session_timeout(),
    );

    if let Err(err) = auth_state
        .store()
        .update_session_expiry(session.user_id, Some(session.expires_at))
        .await
    {
        error!(
            "Failed to persist session expiry for {}: {err}",
            session.username
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed").into_response();
    }

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state, &token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed").into_response();
        }
    }

    let response = SessionResponse::from(&session);
    auth_state.sessions().insert(token_hash, session, now).await;

    (StatusCode::OK, response_headers, Json(response)).into_response()
}
