mod signature;

pub use signature::{
    base64_signature,
    constant_time_eq,
    hex_signature,
    hmac_sha256,
    payload_digest,
    verify_base64_signature,
    verify_hex_signature,
};
