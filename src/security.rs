// src/security.rs
//! Request signing and replay-window checks
//!
//! Bodies are signed with HMAC-SHA256 over the raw bytes and the signature
//! travels hex-encoded in the `x-flame-signature` header.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body`
pub fn sign(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature; malformed input is a mismatch
pub fn verify(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Whether `iat`/`exp` (unix millis) fall inside the accepted window now
pub fn validate_window(iat: i64, exp: i64, max_skew_ms: i64) -> bool {
    validate_window_at(iat, exp, max_skew_ms, Utc::now().timestamp_millis())
}

/// Window check against an explicit clock
pub fn validate_window_at(iat: i64, exp: i64, max_skew_ms: i64, now: i64) -> bool {
    if iat > now.saturating_add(max_skew_ms) {
        return false;
    }
    if exp < now.saturating_sub(max_skew_ms) {
        return false;
    }
    exp > iat
}
