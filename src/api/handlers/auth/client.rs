//! Client identity as seen from request headers.

use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};

/// What we know about the browser on the other end of a request.
///
/// Sessions bind to these values on first use; any later deviation ends the
/// session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ClientInfo {
    pub(crate) ip: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) accept_language: Option<String>,
}

impl ClientInfo {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip: extract_client_ip(headers),
            user_agent: header_value(headers, header::USER_AGENT.as_str()),
            accept_language: header_value(headers, header::ACCEPT_LANGUAGE.as_str()),
        }
    }

    /// SHA-256 over user agent, IP, and accept-language.
    ///
    /// Missing headers hash as empty strings so the value is stable for
    /// clients that never send them.
    pub(crate) fn fingerprint(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.user_agent.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(self.ip.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(
            self.accept_language
                .as_deref()
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.finalize().to_vec()
    }
}

/// Extract the client IP from common proxy headers.
///
/// `x-forwarded-for` may carry a chain; the first hop is the client.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
