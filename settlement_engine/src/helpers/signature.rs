//! HMAC-SHA256 primitives shared by the provider signature schemes.
//!
//! All comparisons of signatures run in constant time. Signatures are always computed over the raw request bytes,
//! never over re-serialized JSON.
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(secret: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    // HMAC accepts keys of any length, so `new_from_slice` cannot fail here
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Checks a hex-encoded HMAC-SHA256 signature of `parts`. Case-insensitive in the hex digits.
pub fn verify_hex_signature(secret: &[u8], parts: &[&[u8]], signature: &str) -> bool {
    match hex::decode(signature.trim()) {
        Ok(provided) => constant_time_eq(&hmac_sha256(secret, parts), &provided),
        Err(_) => false,
    }
}

/// Checks a base64-encoded (standard alphabet, padded) HMAC-SHA256 signature of `parts`.
pub fn verify_base64_signature(secret: &[u8], parts: &[&[u8]], signature: &str) -> bool {
    match base64::decode(signature.trim()) {
        Ok(provided) => constant_time_eq(&hmac_sha256(secret, parts), &provided),
        Err(_) => false,
    }
}

pub fn hex_signature(secret: &[u8], parts: &[&[u8]]) -> String {
    hex::encode(hmac_sha256(secret, parts))
}

pub fn base64_signature(secret: &[u8], parts: &[&[u8]]) -> String {
    base64::encode(hmac_sha256(secret, parts))
}

/// Hex SHA-256 of a request body. Stored on every delivery for audit.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}
