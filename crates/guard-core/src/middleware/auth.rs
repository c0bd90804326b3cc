//! Credential checks for inbound requests and `Basic` header encoding.

use crate::types::Credentials;
use base64::{engine::general_purpose::STANDARD, Engine};
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
use subtle::ConstantTimeEq;

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Builds `Basic base64(user:pass)`.
#[must_use]
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Extracts `(user, pass)` from a `Basic` authorization header.
///
/// The scheme is matched case-insensitively; the password may contain `:`.
#[must_use]
pub fn parse_basic(value: &HeaderValue) -> Option<(String, String)> {
    let raw = value.to_str().ok()?;
    let (scheme, encoded) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Returns whether `headers` satisfy `expected`.
///
/// Bearer tokens must match the whole `Authorization` header byte for byte. Basic credentials
/// must match both user and password exactly. [`Credentials::None`] accepts everything.
#[must_use]
pub fn credentials_match(expected: &Credentials, headers: &HeaderMap) -> bool {
    match expected {
        Credentials::None => true,
        Credentials::Bearer(token) => headers
            .get(AUTHORIZATION)
            .is_some_and(|presented| ct_eq(presented.as_bytes(), token.as_bytes())),
        Credentials::Basic { username, password } => {
            let Some((user, pass)) = headers.get(AUTHORIZATION).and_then(parse_basic) else {
                return false;
            };
            // Evaluate both halves so timing does not reveal which one differed.
            let user_ok = ct_eq(user.as_bytes(), username.as_bytes());
            let pass_ok = ct_eq(pass.as_bytes(), password.as_bytes());
            user_ok & pass_ok
        }
    }
}
