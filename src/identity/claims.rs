//! Unverified claim reads
//!
//! Signature verification belongs to the identity provider's JWKS and is
//! out of reach here. This only reads the subject for display and audit.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// `sub` claim of a compact JWT, if it decodes
pub fn subject_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("sub")?.as_str().map(str::to_string)
}
