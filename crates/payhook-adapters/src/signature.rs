//! Signature primitives shared by the provider adapters
//!
//! All comparisons against attacker-controlled input go through
//! [`constant_time_eq`] to prevent timing side channels.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

/// HMAC-SHA512 of `body` keyed by `secret`, hex-encoded
pub fn hmac_sha512_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA256 of `body` keyed by `secret`, hex-encoded
pub fn hmac_sha256_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// SHA-256 digest of `data`, hex-encoded
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Derive an idempotency key for providers that do not supply an event id:
/// `sha256(raw_body || provider || received_at)`.
pub fn synthesize_idempotency_key(
    raw_body: &[u8],
    provider: &str,
    received_at: chrono::DateTime<chrono::Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_body);
    hasher.update(provider.as_bytes());
    hasher.update(received_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}
