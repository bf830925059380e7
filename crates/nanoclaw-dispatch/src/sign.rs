//! HMAC envelope signing and verification.
//!
//! The signature covers `"{ts}.{body}"` with HMAC-SHA256 and travels as
//! `sha256=<hex>`. Verification uses constant-time comparison and rejects
//! timestamps outside the replay window.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed age of a signature timestamp, in milliseconds.
/// Dispatches older than this are rejected to prevent replay.
const MAX_SIGNATURE_AGE_MS: u64 = 5 * 60 * 1000;

/// Compute the hex HMAC-SHA256 of `"{ts}.{body}"`.
///
/// Pure function: identical inputs always produce identical output.
pub fn sign(secret: &str, ts_ms: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(ts_ms.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// The full signature header value, `sha256=<hex>`.
pub fn signature_header(secret: &str, ts_ms: &str, body: &str) -> String {
    format!("sha256={}", sign(secret, ts_ms, body))
}

/// Verify a dispatch signature.
///
/// `now_ms` is injected so verification stays deterministic under test.
/// Rejects non-numeric timestamps, timestamps older than the replay window
/// (or too far in the future), and any signature mismatch.
pub fn verify(secret: &str, ts_header: &str, body: &str, sig_header: &str, now_ms: u64) -> bool {
    let Ok(ts) = ts_header.parse::<u64>() else {
        return false;
    };

    if now_ms.saturating_sub(ts) > MAX_SIGNATURE_AGE_MS
        || ts.saturating_sub(now_ms) > MAX_SIGNATURE_AGE_MS
    {
        return false;
    }

    let expected = signature_header(secret, ts_header, body);
    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_header.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        // Burn comparable time on length mismatch.
        let _ = expected_bytes.ct_eq(expected_bytes);
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
