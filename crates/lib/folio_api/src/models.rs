//! HTTP request/response bodies. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use folio_core::auth::admin::{MfaEnrollment, SetupStatus};
use folio_core::models::auth::{Role, Session, TokenClaims, TokenPair, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// `identifier` is an email or a username.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(alias = "email", alias = "username")]
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    /// Revoke every session of the authenticated caller.
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub revoked: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    pub avatar_url: Option<String>,
    pub mfa_enabled: bool,
    pub oauth_provider: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            is_verified: user.is_verified,
            avatar_url: user.avatar_url.clone(),
            mfa_enabled: user.totp_enabled,
            oauth_provider: user.oauth_provider.clone(),
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            token_type: pair.token_type,
            user: None,
        }
    }
}

impl From<Session> for TokenResponse {
    fn from(session: Session) -> Self {
        let user = UserResponse::from(&session.user);
        Self {
            user: Some(user),
            ..session.tokens.into()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub expires_at: i64,
}

impl From<&TokenClaims> for ValidateResponse {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            valid: true,
            user_id: claims.sub.clone(),
            username: claims.username.clone(),
            email: claims.email.clone(),
            role: claims.role,
            expires_at: claims.exp,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

/// Either a full token response or an MFA challenge.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AdminLoginResponse {
    Authenticated(TokenResponse),
    #[serde(rename_all = "camelCase")]
    MfaRequired {
        mfa_required: bool,
        mfa_token: String,
        expires_in: i64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaVerifyRequest {
    pub mfa_token: String,
    pub code: String,
    #[serde(default)]
    pub is_backup_code: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequestResponse {
    pub sent: bool,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSetupRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub setup_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatusResponse {
    pub needs_setup: bool,
    pub setup_enabled: bool,
    /// Whether the caller presented a valid admin token.
    pub is_admin: bool,
}

impl SetupStatusResponse {
    pub fn new(status: SetupStatus, is_admin: bool) -> Self {
        Self {
            needs_setup: status.needs_setup,
            setup_enabled: status.setup_enabled,
            is_admin,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaEnrollmentResponse {
    pub secret: String,
    pub otpauth_uri: String,
    pub backup_codes: Vec<String>,
}

impl From<MfaEnrollment> for MfaEnrollmentResponse {
    fn from(e: MfaEnrollment) -> Self {
        Self {
            secret: e.secret,
            otpauth_uri: e.otpauth_uri,
            backup_codes: e.backup_codes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordConfirmRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthInitiateQuery {
    pub redirect_to: Option<String>,
}

/// Raw provider callback query.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProvidersResponse {
    pub providers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
