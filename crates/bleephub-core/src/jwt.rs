//! Unsigned JWT minting.
//!
//! The runner only forwards these tokens back to us and never checks a
//! signature, so they are `alg: none` with an empty signature segment.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde::Serialize;

pub const ISSUER: &str = "bleephub";
pub const SCOPES: &str = "Actions.Results:write Actions.Pipelines:read";
/// One year.
pub const TOKEN_LIFETIME_SECS: i64 = 31_536_000;

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    iss: &'static str,
    aud: &'a str,
    nbf: i64,
    exp: i64,
    scp: &'static str,
}

/// Mint `header.payload.` with base64url segments and padding stripped.
pub fn make_jwt(subject: &str, audience: &str) -> String {
    let now = Utc::now().timestamp();
    let header = Header {
        alg: "none",
        typ: "JWT",
    };
    let claims = Claims {
        sub: subject,
        iss: ISSUER,
        aud: audience,
        nbf: now,
        exp: now + TOKEN_LIFETIME_SECS,
        scp: SCOPES,
    };
    format!("{}.{}.", encode_segment(&header), encode_segment(&claims))
}

fn encode_segment<T: Serialize>(value: &T) -> String {
    // Serializing these plain structs cannot fail.
    let json = serde_json::to_vec(value).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}
