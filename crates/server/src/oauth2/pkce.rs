//! PKCE (RFC 7636) verification.

use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const METHOD_PLAIN: &str = "plain";
pub const METHOD_S256: &str = "S256";

/// Whether `method` is a challenge method this server accepts.
pub fn is_supported_method(method: &str) -> bool {
    method == METHOD_PLAIN || method == METHOD_S256
}

/// Derive the S256 challenge for a verifier.
pub fn s256_challenge(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Check a verifier against the stored challenge. Unknown methods never verify.
pub fn verify(code_verifier: &str, code_challenge: &str, method: &str) -> bool {
    let computed = match method {
        METHOD_PLAIN => code_verifier.to_string(),
        METHOD_S256 => s256_challenge(code_verifier),
        _ => return false,
    };
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}
