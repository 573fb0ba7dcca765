//! server::credentials
//!
//! Pull the caller's secret out of a request.
//!
//! Checked in order:
//! 1. `Authorization: Bearer <secret>`
//! 2. `Authorization: Basic base64(<user>:<secret>)`, as git clients send it.
//!    When the password is empty the user name is taken as the secret.
//! 3. The `token` query parameter

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// The presented secret, if any.
pub fn extract_secret(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Some(value) = header {
        if let Some(token) = strip_scheme(value, "Bearer").filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
        if let Some(secret) = strip_scheme(value, "Basic").and_then(basic_secret) {
            return Some(secret);
        }
    }
    query_token
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (name, rest) = value.trim().split_once(' ')?;
    name.eq_ignore_ascii_case(scheme).then(|| rest.trim())
}

fn basic_secret(encoded: &str) -> Option<String> {
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    match (user, password) {
        (_, p) if !p.is_empty() => Some(p.to_string()),
        (u, _) if !u.is_empty() => Some(u.to_string()),
        _ => None,
    }
}
