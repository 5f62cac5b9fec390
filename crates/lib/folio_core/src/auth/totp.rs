//! TOTP second factor and one-time backup codes.
//!
//! Codes are RFC 6238 SHA-1, 6 digits, 30 second steps, accepted within one
//! step either side of now. Backup codes are only ever persisted as SHA-256
//! digests of their normalized form.

use rand::Rng;
use totp_rs::{Algorithm, Secret, TOTP};

use super::AuthError;
use crate::crypto::sha256_hex;

pub const TOTP_DIGITS: usize = 6;
pub const TOTP_STEP_SECS: u64 = 30;
pub const TOTP_SKEW: u8 = 1;

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP: usize = 4;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn build(secret_b32: &str, issuer: &str, account: &str) -> Result<TOTP, AuthError> {
    let bytes = Secret::Encoded(secret_b32.to_string())
        .to_bytes()
        .map_err(|e| AuthError::Internal(format!("totp secret: {e:?}")))?;
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECS,
        bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| AuthError::Internal(format!("totp init: {e}")))
}

/// A fresh random secret, base32 encoded.
pub fn generate_secret() -> Result<String, AuthError> {
    match Secret::generate_secret().to_encoded() {
        Secret::Encoded(s) => Ok(s),
        Secret::Raw(_) => Err(AuthError::Internal("totp secret encoding".into())),
    }
}

/// `otpauth://` URI for authenticator apps.
pub fn provisioning_uri(secret_b32: &str, issuer: &str, account: &str) -> Result<String, AuthError> {
    Ok(build(secret_b32, issuer, account)?.get_url())
}

/// Check `code` against the current time window.
///
/// Anything that is not exactly six ASCII digits fails without touching the
/// secret.
pub fn verify_code(secret_b32: &str, code: &str) -> Result<bool, AuthError> {
    let code = code.trim();
    if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }
    let totp = build(secret_b32, "folio", "user")?;
    Ok(totp.check_current(code).unwrap_or(false))
}

/// Generate a fresh set of plaintext backup codes, formatted `XXXX-XXXX-XXXX`.
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let raw: String = (0..BACKUP_CODE_LEN)
                .map(|_| {
                    let idx = rng.random_range(0..BACKUP_CODE_ALPHABET.len());
                    char::from(BACKUP_CODE_ALPHABET[idx])
                })
                .collect();
            format_backup_code(&raw)
        })
        .collect()
}

fn format_backup_code(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip separators and whitespace, uppercase. `None` if the result cannot be a backup code.
pub fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let valid = normalized.len() == BACKUP_CODE_LEN
        && normalized.bytes().all(|b| BACKUP_CODE_ALPHABET.contains(&b));
    valid.then_some(normalized)
}

/// Storage digest of a backup code. Accepts any formatting of the code.
pub fn hash_backup_code(code: &str) -> Option<String> {
    normalize_backup_code(code).map(|n| sha256_hex(&n))
}
