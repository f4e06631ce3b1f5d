//! Small helpers for login validation and session token handling.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Portal usernames: letters, digits, dot, underscore, hyphen; 3 to 64 chars.
pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{2,63}$").is_ok_and(|regex| regex.is_match(username))
}

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the registry keys on a hash.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never leave the response that set them.
/// The hash is used for lookups when the cookie is presented.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
