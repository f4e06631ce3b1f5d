//! Session endpoints and the cookie plumbing they share.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use url::form_urlencoded;

use super::{
    client::ClientInfo,
    state::{absolute_session_lifetime, AuthConfig, AuthState},
    types::SessionResponse,
    utils::hash_session_token,
    validator::{destroy_session, validate_session, SessionRejection, Validation},
};
use crate::api::store::Role;

const SESSION_COOKIE_NAME: &str = "seanco_session";

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 303, description = "No valid session; redirect to the login page with a message")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(token) = extract_session_token(&headers) else {
        return login_redirect(auth_state.config(), None, &SessionRejection::NoSession);
    };
    // Only the hash is kept; never compare raw tokens against the registry.
    let token_hash = hash_session_token(&token);
    let client = ClientInfo::from_headers(&headers);

    match validate_session(&auth_state, &token_hash, &client, Utc::now()).await {
        Validation::Active(session) => {
            (StatusCode::OK, Json(SessionResponse::from(&session))).into_response()
        }
        Validation::Rejected { rejection, role } => {
            login_redirect(auth_state.config(), role, &rejection)
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        destroy_session(&auth_state, &hash_session_token(&token)).await;
    }

    // Always clear the cookie, even if there was nothing to destroy.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// 303 back to the login page for `role`, carrying the rejection message.
/// The dead cookie goes too so the browser stops resending it.
fn login_redirect(
    config: &AuthConfig,
    role: Option<Role>,
    rejection: &SessionRejection,
) -> axum::response::Response {
    let mut response_headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&login_location(config, role, rejection)) {
        response_headers.insert(LOCATION, location);
    }
    if let Ok(cookie) = clear_session_cookie(config) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::SEE_OTHER, response_headers).into_response()
}

/// Login URL for a role on the portal frontend, message in the query string.
fn login_location(config: &AuthConfig, role: Option<Role>, rejection: &SessionRejection) -> String {
    let base = config.portal_base_url().trim_end_matches('/');
    let path = role.map_or("/login", Role::login_path);
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("message", &rejection.to_string())
        .finish();
    format!("{base}{path}?{query}")
}

/// Build a secure `HttpOnly` cookie for the session token.
///
/// Max-Age matches the absolute session lifetime; the idle window is
/// enforced server-side, so a longer-lived cookie only ever reaches a
/// session that already refuses it.
pub(super) fn session_cookie(
    auth_state: &AuthState,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = absolute_session_lifetime().num_seconds();
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(auth_config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        // Pairs without '=' are skipped rather than aborting the scan.
        if let Some((key, val)) = pair.trim().split_once('=') {
            if key.trim() == SESSION_COOKIE_NAME {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
