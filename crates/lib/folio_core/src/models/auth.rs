//! Authentication domain models.
//!
//! These are internal domain models, distinct from the HTTP request/response
//! types in `folio_api` (which carry `#[serde(rename)]` for camelCase etc.).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Domain user.
///
/// Never physically deleted; deactivation flips `is_active`.
#[derive(Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    /// bcrypt hash. `None` for accounts provisioned through OAuth only.
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub is_verified: bool,
    pub avatar_url: Option<String>,
    /// AES-GCM encrypted base32 TOTP secret.
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub oauth_provider: Option<String>,
    pub oauth_provider_id: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh, active, unverified account with a time-sortable id.
    pub fn new(email: &str, username: &str, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            email: email.to_string(),
            username: username.to_string(),
            full_name: None,
            password_hash: None,
            role,
            is_active: true,
            is_verified: false,
            avatar_url: None,
            totp_secret: None,
            totp_enabled: false,
            oauth_provider: None,
            oauth_provider_id: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Identity fields embedded in tokens and refresh records.
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// Hand-written so secrets never reach logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .field("totp_enabled", &self.totp_enabled)
            .field("oauth_provider", &self.oauth_provider)
            .finish_non_exhaustive()
    }
}

/// The identity a session is issued for. Also the refresh-token record value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the user ID.
    pub sub: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Not before (unix timestamp).
    pub nbf: i64,
    /// Unique token id.
    pub jti: String,
}

impl TokenClaims {
    /// Parsed subject. `None` when the subject is not a user id.
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Claims of the short-lived token handed out between password and second factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaPendingClaims {
    /// Always [`crate::auth::jwt::MFA_PENDING_SUBJECT`].
    pub sub: String,
    /// The user that passed the password step.
    pub uid: Uuid,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
}

/// Access token + refresh token issued together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub token_type: String,
}

/// A token pair together with the user it was issued for.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
}

/// Outcome of using a backup code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupCodeUse {
    Consumed,
    AlreadyUsed,
    Unknown,
}

/// Kinds of security-relevant events kept in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    Login,
    AdminLogin,
    MfaChallenge,
    MfaTotp,
    MfaBackupCode,
    MfaBackupCodeReuse,
    MfaEnrolled,
    MfaDisabled,
    OAuthLogin,
    AdminSetup,
    PasswordChanged,
    Deactivated,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::Login => "login",
            AuthEventKind::AdminLogin => "admin_login",
            AuthEventKind::MfaChallenge => "mfa_challenge",
            AuthEventKind::MfaTotp => "mfa_totp",
            AuthEventKind::MfaBackupCode => "mfa_backup_code",
            AuthEventKind::MfaBackupCodeReuse => "mfa_backup_code_reuse",
            AuthEventKind::MfaEnrolled => "mfa_enrolled",
            AuthEventKind::MfaDisabled => "mfa_disabled",
            AuthEventKind::OAuthLogin => "oauth_login",
            AuthEventKind::AdminSetup => "admin_setup",
            AuthEventKind::PasswordChanged => "password_changed",
            AuthEventKind::Deactivated => "deactivated",
        }
    }
}

/// Auditable authentication event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: AuthEventKind,
    pub success: bool,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuthEvent {
    pub fn new(user_id: Option<Uuid>, kind: AuthEventKind, success: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind,
            success,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
