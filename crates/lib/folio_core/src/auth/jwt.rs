//! JWT token generation and verification.
//!
//! Access tokens are HS256-signed and carry a fixed claim set with issuer and
//! audience. MFA-pending tokens reuse the same key but a distinct audience and
//! a sentinel subject, so they can never pass as an access token.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::auth::{Identity, MfaPendingClaims, TokenClaims};

/// Access tokens never live shorter than 15 minutes, whatever the config says.
pub const MIN_ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh tokens never live shorter than one day.
pub const MIN_REFRESH_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// MFA-pending token lifetime: 5 minutes.
pub const MFA_TOKEN_TTL_SECS: i64 = 5 * 60;

/// Subject carried by every MFA-pending token.
pub const MFA_PENDING_SUBJECT: &str = "mfa_pending";

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token signature mismatch")]
    SignatureMismatch,

    #[error("token claim mismatch: {0}")]
    ClaimMismatch(&'static str),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token encoding failed: {0}")]
    Encode(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::SignatureMismatch,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::ClaimMismatch("alg")
            }
            ErrorKind::InvalidIssuer => TokenError::ClaimMismatch("iss"),
            ErrorKind::InvalidAudience => TokenError::ClaimMismatch("aud"),
            ErrorKind::InvalidSubject => TokenError::ClaimMismatch("sub"),
            ErrorKind::ImmatureSignature => TokenError::ClaimMismatch("nbf"),
            _ => TokenError::Malformed(e.to_string()),
        }
    }
}

/// Signs and verifies access and MFA-pending tokens.
///
/// Pure and stateless: safe to share behind an `Arc` across request tasks.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenCodec {
    pub fn new(
        secret: &[u8],
        issuer: &str,
        audience: &str,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            access_ttl_secs: access_ttl_secs.max(MIN_ACCESS_TOKEN_TTL_SECS),
            refresh_ttl_secs: refresh_ttl_secs.max(MIN_REFRESH_TOKEN_TTL_SECS),
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(
            config.secret.as_bytes(),
            &config.issuer,
            &config.audience,
            config.access_ttl_secs,
            config.refresh_ttl_secs,
        )
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_ttl_secs.unsigned_abs())
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    fn mfa_audience(&self) -> String {
        format!("{}:mfa", self.audience)
    }

    /// Build and sign an access token for `identity`.
    pub fn issue_access_token(&self, identity: &Identity) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: identity.user_id.to_string(),
            username: identity.username.clone(),
            email: identity.email.clone(),
            role: identity.role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (now + Duration::seconds(self.access_ttl_secs)).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    /// Sign an arbitrary claim set with this codec's key.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    fn validation(&self, audience: &str) -> Validation {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.algorithms = vec![SIGNING_ALGORITHM];
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }

    /// Verify an access token, returning the claims on success.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation(&self.audience))?;
        let claims = data.claims;
        if claims.sub == MFA_PENDING_SUBJECT || claims.user_id().is_none() {
            return Err(TokenError::ClaimMismatch("sub"));
        }
        Ok(claims)
    }

    /// Issue the 5-minute token that stands between password and second factor.
    pub fn issue_mfa_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = MfaPendingClaims {
            sub: MFA_PENDING_SUBJECT.to_string(),
            uid: user_id,
            iss: self.issuer.clone(),
            aud: self.mfa_audience(),
            exp: (now + Duration::seconds(MFA_TOKEN_TTL_SECS)).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verify an MFA-pending token, returning the user it was issued for.
    pub fn verify_mfa_token(&self, token: &str) -> Result<Uuid, TokenError> {
        let audience = self.mfa_audience();
        let data = decode::<MfaPendingClaims>(token, &self.decoding, &self.validation(&audience))?;
        if data.claims.sub != MFA_PENDING_SUBJECT {
            return Err(TokenError::ClaimMismatch("sub"));
        }
        Ok(data.claims.uid)
    }
}
