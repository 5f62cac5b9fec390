//! Admin authentication: allow-listed emails, optional TOTP second factor
//! and first-admin bootstrap.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::AuthError;
use super::credentials::{CredentialService, normalize_email};
use super::jwt::MFA_TOKEN_TTL_SECS;
use super::password::validate_strength;
use super::totp;
use crate::cache::Cache;
use crate::config::AdminConfig;
use crate::crypto::{SecretBox, random_token, secrets_match, sha256_hex};
use crate::models::auth::{AuthEvent, AuthEventKind, BackupCodeUse, Role, Session, User};
use crate::repository::RepositoryError;

/// One-time setup tokens expire after an hour.
pub const SETUP_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

const SETUP_TOKEN_PREFIX: &str = "admin_setup:";

/// Exact addresses and `@domain` suffixes allowed to act as admin.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    emails: HashSet<String>,
    domains: Vec<String>,
}

impl AdminAllowList {
    pub fn new<E, D>(emails: E, domains: D) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches('@').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .map(|d| format!("@{d}"))
            .collect();
        Self { emails, domains }
    }

    pub fn from_config(config: &AdminConfig) -> Self {
        Self::new(&config.allowed_emails, &config.allowed_domains)
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.domains.is_empty()
    }

    /// Exact address match or domain suffix match, case-insensitive.
    pub fn is_allowed(&self, email: &str) -> bool {
        let email = email.trim().to_ascii_lowercase();
        if email.matches('@').count() != 1 {
            return false;
        }
        self.emails.contains(&email) || self.domains.iter().any(|d| email.ends_with(d.as_str()))
    }
}

/// Delivers one-time setup tokens to the requesting admin.
#[async_trait]
pub trait SetupTokenNotifier: Send + Sync {
    async fn deliver(&self, email: &str, token: &str) -> Result<(), AuthError>;
}

/// Logs that a token was issued. The token itself is never logged.
pub struct LogNotifier;

#[async_trait]
impl SetupTokenNotifier for LogNotifier {
    async fn deliver(&self, email: &str, _token: &str) -> Result<(), AuthError> {
        info!(target: "audit", email, "admin setup token issued");
        Ok(())
    }
}

/// Result of the password step of an admin login.
#[derive(Debug)]
pub enum AdminLoginOutcome {
    Authenticated(Session),
    /// Second factor required; `mfa_token` is only good for the MFA endpoint.
    MfaRequired { mfa_token: String, expires_in: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatus {
    /// No admin account exists yet.
    pub needs_setup: bool,
    /// A setup path is configured (pre-shared token or allow-list for issued tokens).
    pub setup_enabled: bool,
}

/// Material shown once when an admin starts TOTP enrollment.
#[derive(Debug, Clone)]
pub struct MfaEnrollment {
    pub secret: String,
    pub otpauth_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SetupRecord {
    email: String,
}

pub struct AdminAuthService {
    credentials: Arc<CredentialService>,
    allow_list: AdminAllowList,
    secrets: SecretBox,
    cache: Arc<dyn Cache>,
    setup_token: Option<String>,
    totp_issuer: String,
    notifier: Arc<dyn SetupTokenNotifier>,
    setup_lock: Mutex<()>,
}

impl AdminAuthService {
    pub fn new(
        credentials: Arc<CredentialService>,
        config: &AdminConfig,
        secrets: SecretBox,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            credentials,
            allow_list: AdminAllowList::from_config(config),
            secrets,
            cache,
            setup_token: config.setup_token.clone().filter(|t| !t.is_empty()),
            totp_issuer: config.totp_issuer.clone(),
            notifier: Arc::new(LogNotifier),
            setup_lock: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SetupTokenNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn allow_list(&self) -> &AdminAllowList {
        &self.allow_list
    }

    async fn audit(&self, user_id: Option<Uuid>, kind: AuthEventKind, success: bool, detail: &str) {
        let mut event = AuthEvent::new(user_id, kind, success);
        if !detail.is_empty() {
            event = event.with_detail(detail);
        }
        self.credentials.auditor().record(event).await;
    }

    /// Password step. The allow-list is checked before anything else.
    pub async fn login(&self, email: &str, password: &str) -> Result<AdminLoginOutcome, AuthError> {
        if !self.allow_list.is_allowed(email) {
            warn!(target: "audit", email, "admin login for email outside allow-list");
            self.audit(None, AuthEventKind::AdminLogin, false, "email not allow-listed")
                .await;
            return Err(AuthError::EmailNotAuthorized);
        }

        let user = self.credentials.find_for_login(email, password).await?;
        self.credentials
            .check_password(&user, password, AuthEventKind::AdminLogin)
            .await?;
        if !user.is_admin() {
            self.audit(Some(user.id), AuthEventKind::AdminLogin, false, "not an admin")
                .await;
            return Err(AuthError::InvalidCredentials);
        }

        if user.totp_enabled {
            let mfa_token = self
                .credentials
                .sessions()
                .codec()
                .issue_mfa_token(user.id)?;
            self.audit(Some(user.id), AuthEventKind::MfaChallenge, true, "")
                .await;
            return Ok(AdminLoginOutcome::MfaRequired {
                mfa_token,
                expires_in: MFA_TOKEN_TTL_SECS,
            });
        }

        let session = self
            .credentials
            .open_session(user, AuthEventKind::AdminLogin)
            .await?;
        Ok(AdminLoginOutcome::Authenticated(session))
    }

    /// Second-factor step: a TOTP code or one unused backup code.
    pub async fn verify_mfa_and_login(
        &self,
        mfa_token: &str,
        code: &str,
        is_backup_code: bool,
    ) -> Result<Session, AuthError> {
        let user_id = self
            .credentials
            .sessions()
            .codec()
            .verify_mfa_token(mfa_token)?;
        let user = self.credentials.lookup(user_id).await?;
        if !user.is_admin() || !user.totp_enabled || !self.allow_list.is_allowed(&user.email) {
            return Err(AuthError::InvalidCredentials);
        }

        let kind = if is_backup_code {
            self.check_backup_code(&user, code).await?
        } else {
            self.check_totp(&user, code).await?
        };
        self.audit(Some(user.id), kind, true, "").await;
        self.credentials
            .open_session(user, AuthEventKind::AdminLogin)
            .await
    }

    async fn check_totp(&self, user: &User, code: &str) -> Result<AuthEventKind, AuthError> {
        let secret = self.decrypt_totp_secret(user)?;
        if totp::verify_code(&secret, code)? {
            return Ok(AuthEventKind::MfaTotp);
        }
        self.audit(Some(user.id), AuthEventKind::MfaTotp, false, "invalid code")
            .await;
        Err(AuthError::MfaInvalid)
    }

    async fn check_backup_code(&self, user: &User, code: &str) -> Result<AuthEventKind, AuthError> {
        let outcome = match totp::hash_backup_code(code) {
            Some(hash) => self.credentials.users().consume_backup_code(user.id, &hash).await?,
            None => BackupCodeUse::Unknown,
        };
        match outcome {
            BackupCodeUse::Consumed => Ok(AuthEventKind::MfaBackupCode),
            BackupCodeUse::AlreadyUsed => {
                warn!(target: "audit", user_id = %user.id, "backup code reuse attempt");
                self.audit(Some(user.id), AuthEventKind::MfaBackupCodeReuse, false, "code already used")
                    .await;
                Err(AuthError::MfaInvalid)
            }
            BackupCodeUse::Unknown => {
                self.audit(Some(user.id), AuthEventKind::MfaBackupCode, false, "unknown code")
                    .await;
                Err(AuthError::MfaInvalid)
            }
        }
    }

    fn decrypt_totp_secret(&self, user: &User) -> Result<String, AuthError> {
        let encrypted = user
            .totp_secret
            .as_deref()
            .ok_or_else(|| AuthError::Internal("totp enabled without secret".into()))?;
        Ok(self.secrets.decrypt(encrypted)?)
    }

    pub async fn setup_status(&self) -> Result<SetupStatus, AuthError> {
        let needs_setup = self.credentials.users().count_admins().await? == 0;
        Ok(SetupStatus {
            needs_setup,
            setup_enabled: needs_setup
                && (self.setup_token.is_some() || !self.allow_list.is_empty()),
        })
    }

    /// Issue a one-time setup token for an allow-listed email while no admin exists.
    pub async fn request_setup(&self, email: &str) -> Result<Duration, AuthError> {
        if self.credentials.users().count_admins().await? > 0 {
            return Err(AuthError::SetupDisabled);
        }
        let email = normalize_email(email)?;
        if !self.allow_list.is_allowed(&email) {
            warn!(target: "audit", email = %email, "admin setup requested for email outside allow-list");
            return Err(AuthError::EmailNotAuthorized);
        }

        let token = random_token(32);
        let record = serde_json::to_value(SetupRecord {
            email: email.clone(),
        })
        .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.cache
            .set(&setup_key(&token), record, SETUP_TOKEN_TTL)
            .await?;
        self.notifier.deliver(&email, &token).await?;
        Ok(SETUP_TOKEN_TTL)
    }

    /// Create the first admin account.
    ///
    /// Accepts the pre-shared token or a token issued by
    /// [`request_setup`](Self::request_setup) for this same email. Issued tokens
    /// are consumed even when the pre-shared one also matches. Concurrent
    /// calls are serialized and at most one of them creates an admin.
    pub async fn complete_setup(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
        setup_token: &str,
    ) -> Result<User, AuthError> {
        let _setup = self.setup_lock.lock().await;
        if self.credentials.users().count_admins().await? > 0 {
            return Err(AuthError::SetupDisabled);
        }
        let email = normalize_email(email)?;
        if !self.allow_list.is_allowed(&email) {
            return Err(AuthError::EmailNotAuthorized);
        }
        if password != confirm_password {
            return Err(AuthError::Validation("passwords do not match".into()));
        }
        validate_strength(password)?;

        let issued = self
            .cache
            .take(&setup_key(setup_token))
            .await?
            .and_then(|v| serde_json::from_value::<SetupRecord>(v).ok())
            .is_some_and(|r| r.email == email);
        let preshared = self
            .setup_token
            .as_deref()
            .is_some_and(|t| secrets_match(t, setup_token));
        if !issued && !preshared {
            warn!(target: "audit", email = %email, "admin setup with invalid token");
            self.audit(None, AuthEventKind::AdminSetup, false, "invalid setup token")
                .await;
            return Err(AuthError::SetupTokenInvalid);
        }

        let hash = self.credentials.passwords().hash(password).await?;
        let user = match self.credentials.users().find_by_email(&email).await {
            Ok(mut existing) => {
                existing.role = Role::Admin;
                existing.password_hash = Some(hash);
                existing.is_verified = true;
                existing.touch();
                existing
            }
            Err(RepositoryError::NotFound) => {
                let mut user = User::new(&email, &self.credentials.free_username(&email).await?, Role::Admin);
                user.password_hash = Some(hash);
                user.is_verified = true;
                user
            }
            Err(RepositoryError::Inactive) => return Err(AuthError::AccountDeactivated),
            Err(e) => return Err(e.into()),
        };
        if !self.credentials.users().install_first_admin(&user).await? {
            warn!(target: "audit", email = %email, "admin setup lost to a concurrent setup");
            return Err(AuthError::SetupDisabled);
        }

        self.audit(Some(user.id), AuthEventKind::AdminSetup, true, "")
            .await;
        info!(user_id = %user.id, "first admin account created");
        Ok(user)
    }

    /// Start TOTP enrollment: a fresh secret stored encrypted but not yet
    /// enabled, plus ten new backup codes.
    pub async fn begin_mfa_enrollment(&self, user_id: Uuid) -> Result<MfaEnrollment, AuthError> {
        let mut user = self.admin(user_id).await?;
        if user.totp_enabled {
            return Err(AuthError::Validation("MFA is already enabled".into()));
        }

        let secret = totp::generate_secret()?;
        let otpauth_uri = totp::provisioning_uri(&secret, &self.totp_issuer, &user.email)?;
        user.totp_secret = Some(self.secrets.encrypt(&secret)?);
        user.touch();
        self.credentials.users().save(&user).await?;

        let backup_codes = totp::generate_backup_codes();
        let hashes: Vec<String> = backup_codes
            .iter()
            .filter_map(|c| totp::hash_backup_code(c))
            .collect();
        self.credentials
            .users()
            .replace_backup_codes(user.id, &hashes)
            .await?;

        Ok(MfaEnrollment {
            secret,
            otpauth_uri,
            backup_codes,
        })
    }

    /// Enable TOTP once the user proves their authenticator produces valid codes.
    pub async fn confirm_mfa_enrollment(&self, user_id: Uuid, code: &str) -> Result<(), AuthError> {
        let mut user = self.admin(user_id).await?;
        if user.totp_enabled {
            return Ok(());
        }
        if user.totp_secret.is_none() {
            return Err(AuthError::Validation("MFA enrollment not started".into()));
        }
        let secret = self.decrypt_totp_secret(&user)?;
        if !totp::verify_code(&secret, code)? {
            self.audit(Some(user.id), AuthEventKind::MfaEnrolled, false, "invalid code")
                .await;
            return Err(AuthError::MfaInvalid);
        }

        user.totp_enabled = true;
        user.touch();
        self.credentials.users().save(&user).await?;
        self.audit(Some(user.id), AuthEventKind::MfaEnrolled, true, "")
            .await;
        Ok(())
    }

    /// Turn TOTP off after re-checking the password. Backup codes are dropped.
    pub async fn disable_mfa(&self, user_id: Uuid, password: &str) -> Result<(), AuthError> {
        let mut user = self.admin(user_id).await?;
        self.credentials
            .check_password(&user, password, AuthEventKind::MfaDisabled)
            .await?;
        user.totp_enabled = false;
        user.totp_secret = None;
        user.touch();
        self.credentials.users().save(&user).await?;
        self.credentials
            .users()
            .replace_backup_codes(user.id, &[])
            .await?;
        self.audit(Some(user.id), AuthEventKind::MfaDisabled, true, "")
            .await;
        Ok(())
    }

    async fn admin(&self, user_id: Uuid) -> Result<User, AuthError> {
        let user = self.credentials.lookup(user_id).await?;
        if !user.is_admin() {
            return Err(AuthError::Forbidden);
        }
        Ok(user)
    }
}

fn setup_key(token: &str) -> String {
    format!("{SETUP_TOKEN_PREFIX}{}", sha256_hex(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{CapturingNotifier, Fixture};
    use crate::repository::UserRepository;
    use totp_rs::{Algorithm, Secret, TOTP};

    const PASSWORD: &str = "Adm1n!Passw0rd";

    fn current_code(secret_b32: &str) -> String {
        let bytes = Secret::Encoded(secret_b32.to_string()).to_bytes().unwrap();
        TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "x".into())
            .unwrap()
            .generate_current()
            .unwrap()
    }

    fn stale_code(secret_b32: &str) -> String {
        let bytes = Secret::Encoded(secret_b32.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "x".into()).unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let current = totp.generate(now);
        (10..20)
            .map(|steps| totp.generate(now - steps * 30))
            .find(|c| !totp.check(c, now) && *c != current)
            .unwrap()
    }

    async fn bootstrap(fx: &Fixture) -> User {
        fx.admin
            .complete_setup("root@folio.dev", PASSWORD, PASSWORD, "preshared-setup-token")
            .await
            .unwrap()
    }

    async fn enroll(fx: &Fixture, user_id: Uuid) -> MfaEnrollment {
        let enrollment = fx.admin.begin_mfa_enrollment(user_id).await.unwrap();
        fx.admin
            .confirm_mfa_enrollment(user_id, &current_code(&enrollment.secret))
            .await
            .unwrap();
        enrollment
    }

    async fn mfa_token(fx: &Fixture) -> String {
        match fx.admin.login("root@folio.dev", PASSWORD).await.unwrap() {
            AdminLoginOutcome::MfaRequired { mfa_token, expires_in } => {
                assert_eq!(expires_in, 300);
                mfa_token
            }
            AdminLoginOutcome::Authenticated(_) => panic!("expected MFA challenge"),
        }
    }

    #[test]
    fn allow_list_matches_exact_and_domain() {
        let list = AdminAllowList::new(["Owner@Example.com"], ["@folio.dev", "corp.io"]);
        assert!(list.is_allowed("owner@example.com"));
        assert!(list.is_allowed("anyone@FOLIO.dev"));
        assert!(list.is_allowed("x@corp.io"));
        assert!(!list.is_allowed("eve@external.com"));
        assert!(!list.is_allowed("x@sub.folio.dev.evil.com"));
        assert!(!list.is_allowed("x@evilfolio.dev"));
        assert!(!list.is_allowed("a@b@folio.dev"));
        assert!(AdminAllowList::default().is_empty());
    }

    #[tokio::test]
    async fn email_outside_allow_list_is_rejected_before_password() {
        let fx = Fixture::new();
        let mut eve = User::new("eve@external.com", "eve", Role::Admin);
        eve.password_hash = Some(fx.passwords.hash(PASSWORD).await.unwrap());
        fx.store.create(&eve).await.unwrap();

        assert!(matches!(
            fx.admin.login("eve@external.com", PASSWORD).await,
            Err(AuthError::EmailNotAuthorized)
        ));
    }

    #[tokio::test]
    async fn setup_is_one_time() {
        let fx = Fixture::new();
        assert!(fx.admin.setup_status().await.unwrap().needs_setup);

        assert!(matches!(
            fx.admin
                .complete_setup("root@folio.dev", PASSWORD, PASSWORD, "wrong")
                .await,
            Err(AuthError::SetupTokenInvalid)
        ));
        assert!(matches!(
            fx.admin
                .complete_setup("root@folio.dev", PASSWORD, "Other!Passw0rd", "preshared-setup-token")
                .await,
            Err(AuthError::Validation(_))
        ));

        let admin = bootstrap(&fx).await;
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.username, "root");
        assert!(!fx.admin.setup_status().await.unwrap().needs_setup);
        assert!(matches!(
            fx.admin
                .complete_setup("second@folio.dev", PASSWORD, PASSWORD, "preshared-setup-token")
                .await,
            Err(AuthError::SetupDisabled)
        ));
    }

    #[tokio::test]
    async fn concurrent_setups_create_a_single_admin() {
        let fx = Fixture::new();
        let (first, second) = tokio::join!(
            fx.admin
                .complete_setup("root@folio.dev", PASSWORD, PASSWORD, "preshared-setup-token"),
            fx.admin
                .complete_setup("owner@example.com", PASSWORD, PASSWORD, "preshared-setup-token"),
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(loser, Err(AuthError::SetupDisabled)));
        assert_eq!(fx.store.count_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn issued_setup_token_works_once_for_its_email() {
        let notifier = Arc::new(CapturingNotifier::default());
        let fx = Fixture::with_notifier(notifier.clone());
        assert!(matches!(
            fx.admin.request_setup("eve@external.com").await,
            Err(AuthError::EmailNotAuthorized)
        ));

        fx.admin.request_setup("root@folio.dev").await.unwrap();
        let token = notifier.last_token().await.unwrap();
        assert!(matches!(
            fx.admin
                .complete_setup("other@folio.dev", PASSWORD, PASSWORD, &token)
                .await,
            Err(AuthError::SetupTokenInvalid)
        ));

        fx.admin.request_setup("root@folio.dev").await.unwrap();
        let token = notifier.last_token().await.unwrap();
        fx.admin
            .complete_setup("root@folio.dev", PASSWORD, PASSWORD, &token)
            .await
            .unwrap();
        assert!(matches!(
            fx.admin.request_setup("root@folio.dev").await,
            Err(AuthError::SetupDisabled)
        ));
    }

    #[tokio::test]
    async fn admin_without_mfa_gets_session() {
        let fx = Fixture::new();
        bootstrap(&fx).await;
        match fx.admin.login("root@folio.dev", PASSWORD).await.unwrap() {
            AdminLoginOutcome::Authenticated(session) => {
                let claims = fx.codec.verify(&session.tokens.access_token).unwrap();
                assert_eq!(claims.role, Role::Admin);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn regular_user_on_allowed_domain_is_not_an_admin() {
        let fx = Fixture::new();
        let mut user = User::new("intern@folio.dev", "intern", Role::User);
        user.password_hash = Some(fx.passwords.hash(PASSWORD).await.unwrap());
        fx.store.create(&user).await.unwrap();
        assert!(matches!(
            fx.admin.login("intern@folio.dev", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn totp_challenge_then_verify() {
        let fx = Fixture::new();
        let admin = bootstrap(&fx).await;
        let enrollment = enroll(&fx, admin.id).await;

        let token = mfa_token(&fx).await;
        // The pending token is not an access token.
        assert!(fx.codec.verify(&token).is_err());

        assert!(matches!(
            fx.admin
                .verify_mfa_and_login(&token, &stale_code(&enrollment.secret), false)
                .await,
            Err(AuthError::MfaInvalid)
        ));

        let session = fx
            .admin
            .verify_mfa_and_login(&token, &current_code(&enrollment.secret), false)
            .await
            .unwrap();
        assert_eq!(session.user.id, admin.id);
    }

    #[tokio::test]
    async fn backup_codes_are_single_use_and_independent() {
        let fx = Fixture::new();
        let admin = bootstrap(&fx).await;
        let enrollment = enroll(&fx, admin.id).await;
        let (first, second) = (&enrollment.backup_codes[0], &enrollment.backup_codes[1]);

        let token = mfa_token(&fx).await;
        fx.admin
            .verify_mfa_and_login(&token, first, true)
            .await
            .unwrap();
        assert!(matches!(
            fx.admin.verify_mfa_and_login(&token, first, true).await,
            Err(AuthError::MfaInvalid)
        ));
        fx.admin
            .verify_mfa_and_login(&token, &second.to_lowercase(), true)
            .await
            .unwrap();

        let reuse = fx
            .store
            .events()
            .await
            .into_iter()
            .filter(|e| e.kind == AuthEventKind::MfaBackupCodeReuse)
            .count();
        assert_eq!(reuse, 1);
    }

    #[tokio::test]
    async fn enrollment_requires_valid_code_and_disable_requires_password() {
        let fx = Fixture::new();
        let admin = bootstrap(&fx).await;
        let enrollment = fx.admin.begin_mfa_enrollment(admin.id).await.unwrap();
        assert!(enrollment.otpauth_uri.starts_with("otpauth://totp/"));
        assert_eq!(enrollment.backup_codes.len(), 10);

        assert!(matches!(
            fx.admin.confirm_mfa_enrollment(admin.id, "abc").await,
            Err(AuthError::MfaInvalid)
        ));
        // Not enabled yet: password login still completes directly.
        assert!(matches!(
            fx.admin.login("root@folio.dev", PASSWORD).await.unwrap(),
            AdminLoginOutcome::Authenticated(_)
        ));

        fx.admin
            .confirm_mfa_enrollment(admin.id, &current_code(&enrollment.secret))
            .await
            .unwrap();
        assert!(matches!(
            fx.admin.login("root@folio.dev", PASSWORD).await.unwrap(),
            AdminLoginOutcome::MfaRequired { .. }
        ));

        assert!(fx.admin.disable_mfa(admin.id, "Wr0ng!Passw0rd").await.is_err());
        fx.admin.disable_mfa(admin.id, PASSWORD).await.unwrap();
        assert!(matches!(
            fx.admin.login("root@folio.dev", PASSWORD).await.unwrap(),
            AdminLoginOutcome::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn enrollment_is_admin_only() {
        let fx = Fixture::new();
        let user = User::new("bob@example.com", "bob", Role::User);
        fx.store.create(&user).await.unwrap();
        assert!(matches!(
            fx.admin.begin_mfa_enrollment(user.id).await,
            Err(AuthError::Forbidden)
        ));
    }
}
