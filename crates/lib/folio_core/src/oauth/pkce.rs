//! PKCE (RFC 7636) and CSRF value generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::crypto::random_token;

/// Generate a PKCE code verifier (43 chars, URL-safe).
pub fn generate_code_verifier() -> String {
    random_token(32)
}

/// S256 challenge for `verifier`.
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Opaque `state` parameter.
pub fn generate_state() -> String {
    random_token(24)
}

/// OpenID Connect `nonce` parameter.
pub fn generate_nonce() -> String {
    random_token(16)
}
