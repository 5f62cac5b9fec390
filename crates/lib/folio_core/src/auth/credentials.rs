//! Registration, login, refresh and account lifecycle for regular users.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::audit::Auditor;
use super::password::{PasswordPolicy, validate_strength};
use super::session::SessionIssuer;
use crate::models::auth::{AuthEvent, AuthEventKind, Role, Session, TokenPair, User};
use crate::repository::{RepositoryError, UserRepository};
use crate::retry::RetryPolicy;

const MAX_EMAIL_LEN: usize = 254;
const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;

/// New account details.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
}

pub(crate) fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_ascii_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains('@')
            })
        && !email.chars().any(char::is_whitespace);
    if !valid {
        return Err(AuthError::Validation("invalid email address".into()));
    }
    Ok(email)
}

fn validate_username(username: &str) -> Result<String, AuthError> {
    let username = username.trim();
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(AuthError::Validation(format!(
            "username must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AuthError::Validation(
            "username may only contain letters, digits, '_', '-' and '.'".into(),
        ));
    }
    Ok(username.to_string())
}

/// Map a lookup failure during login to the caller-facing error.
fn login_lookup_error(e: RepositoryError) -> AuthError {
    match e {
        RepositoryError::NotFound => AuthError::InvalidCredentials,
        RepositoryError::Inactive => AuthError::AccountDeactivated,
        other => AuthError::Repository(other),
    }
}

pub struct CredentialService {
    users: Arc<dyn UserRepository>,
    passwords: Arc<PasswordPolicy>,
    sessions: SessionIssuer,
    auditor: Auditor,
    retry: RetryPolicy,
}

impl CredentialService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        passwords: Arc<PasswordPolicy>,
        sessions: SessionIssuer,
        auditor: Auditor,
    ) -> Self {
        Self {
            users,
            passwords,
            sessions,
            auditor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// Create an active, unverified user account.
    pub async fn register(&self, input: Registration) -> Result<User, AuthError> {
        let email = normalize_email(&input.email)?;
        let username = validate_username(&input.username)?;
        validate_strength(&input.password)?;

        match self.users.find_by_email(&email).await {
            Ok(_) | Err(RepositoryError::Inactive) => {
                return Err(AuthError::AlreadyExists("email".into()));
            }
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        match self.users.find_by_username(&username).await {
            Ok(_) | Err(RepositoryError::Inactive) => {
                return Err(AuthError::AlreadyExists("username".into()));
            }
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let hash = self.passwords.hash(&input.password).await?;
        let mut user = User::new(&email, &username, Role::User);
        user.password_hash = Some(hash);
        user.full_name = input
            .full_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        self.users.create(&user).await.map_err(|e| match e {
            RepositoryError::Conflict(field) if field.contains("username") => {
                AuthError::AlreadyExists("username".into())
            }
            RepositoryError::Conflict(_) => AuthError::AlreadyExists("email".into()),
            other => other.into(),
        })?;

        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Resolve the account by email (when `identifier` contains `@`) or
    /// username, check the password and issue a session.
    ///
    /// Unknown accounts and wrong passwords are indistinguishable.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Session, AuthError> {
        let user = self.find_for_login(identifier, password).await?;
        self.check_password(&user, password, AuthEventKind::Login)
            .await?;
        self.open_session(user, AuthEventKind::Login).await
    }

    /// Lookup shared with the admin service. Spends a dummy verification on a miss.
    pub(crate) async fn find_for_login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let identifier = identifier.trim();
        let found = if identifier.contains('@') {
            self.users
                .find_by_email(&identifier.to_ascii_lowercase())
                .await
        } else {
            self.users.find_by_username(identifier).await
        };
        match found {
            Ok(user) => Ok(user),
            Err(e) => {
                let err = login_lookup_error(e);
                if matches!(err, AuthError::InvalidCredentials) {
                    self.passwords.verify_dummy(password).await;
                }
                Err(err)
            }
        }
    }

    pub(crate) async fn check_password(
        &self,
        user: &User,
        password: &str,
        kind: AuthEventKind,
    ) -> Result<(), AuthError> {
        let Some(hash) = user.password_hash.as_deref() else {
            self.passwords.verify_dummy(password).await;
            return Err(AuthError::InvalidCredentials);
        };
        if let Err(e) = self.passwords.verify(password, hash).await {
            self.auditor
                .record(AuthEvent::new(Some(user.id), kind, false).with_detail("password mismatch"))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Stamp the login time and issue a token pair.
    pub(crate) async fn open_session(
        &self,
        mut user: User,
        kind: AuthEventKind,
    ) -> Result<Session, AuthError> {
        user.last_login_at = Some(Utc::now());
        user.touch();
        self.users.save(&user).await?;
        let tokens = self.sessions.issue_pair(&user.identity()).await?;
        self.auditor
            .record(AuthEvent::new(Some(user.id), kind, true))
            .await;
        info!(user_id = %user.id, role = %user.role, "session opened");
        Ok(Session { user, tokens })
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The user is re-read so role and active-status changes apply. The
    /// presented token is consumed atomically: each refresh token works once,
    /// even when the same token is presented concurrently. A repository
    /// outage leaves the token usable for a later retry.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let store = self.sessions.refresh_store();
        let identity = store.resolve(refresh_token).await?;
        let user = match self.lookup(identity.user_id).await {
            Ok(user) => user,
            Err(AuthError::Repository(RepositoryError::Inactive)) => {
                store.revoke(refresh_token).await?;
                return Err(AuthError::AccountDeactivated);
            }
            Err(AuthError::Repository(RepositoryError::NotFound)) => {
                store.revoke(refresh_token).await?;
                return Err(AuthError::RefreshTokenInvalid);
            }
            Err(e) => {
                warn!(user_id = %identity.user_id, error = %e, "user lookup failed during refresh");
                return Err(e);
            }
        };

        let consumed = store.consume(refresh_token).await?;
        if consumed.user_id != user.id {
            return Err(AuthError::RefreshTokenInvalid);
        }
        let pair = self.sessions.issue_pair(&user.identity()).await?;
        debug!(user_id = %user.id, "refresh token rotated");
        Ok(pair)
    }

    /// Revoke one refresh token. Unknown tokens succeed silently.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.sessions.refresh_store().revoke(refresh_token).await
    }

    /// Revoke every refresh token of `user_id`.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let revoked = self.sessions.refresh_store().revoke_all(user_id).await?;
        info!(user_id = %user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.lookup(user_id).await
    }

    /// Replace the password after re-verifying the current one. Every
    /// outstanding refresh token of the user is revoked.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let mut user = self.lookup(user_id).await?;
        self.check_password(&user, current_password, AuthEventKind::PasswordChanged)
            .await?;
        if current_password == new_password {
            return Err(AuthError::Validation(
                "new password must differ from the current one".into(),
            ));
        }

        user.password_hash = Some(self.passwords.hash(new_password).await?);
        user.touch();
        self.users.save(&user).await?;
        self.sessions.refresh_store().revoke_all(user.id).await?;
        self.auditor
            .record(AuthEvent::new(Some(user.id), AuthEventKind::PasswordChanged, true))
            .await;
        Ok(())
    }

    /// Soft-deactivate the account and revoke its refresh tokens. Access
    /// tokens already issued stay valid until they expire.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<(), AuthError> {
        let mut user = self.lookup(user_id).await?;
        user.is_active = false;
        user.touch();
        self.users.save(&user).await?;
        let revoked = self.sessions.refresh_store().revoke_all(user.id).await?;
        self.auditor
            .record(AuthEvent::new(Some(user.id), AuthEventKind::Deactivated, true))
            .await;
        info!(user_id = %user.id, revoked, "user deactivated");
        Ok(())
    }

    pub(crate) async fn lookup(&self, user_id: Uuid) -> Result<User, AuthError> {
        Ok(self
            .retry
            .run("user_lookup", || self.users.find_by_id(user_id))
            .await?)
    }

    /// Derive an unused username from the local part of `email`.
    pub(crate) async fn free_username(&self, email: &str) -> Result<String, AuthError> {
        let local = email.split('@').next().unwrap_or_default();
        let mut base: String = local
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .take(24)
            .collect();
        if base.len() < 3 {
            base = format!("admin{base}");
        }
        for n in 0..100u32 {
            let candidate = if n == 0 { base.clone() } else { format!("{base}{n}") };
            match self.users.find_by_username(&candidate).await {
                Err(RepositoryError::NotFound) => return Ok(candidate),
                Ok(_) | Err(RepositoryError::Inactive) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(format!("{base}-{}", &Uuid::new_v4().simple().to_string()[..8]))
    }

    pub(crate) fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub(crate) fn passwords(&self) -> &Arc<PasswordPolicy> {
        &self.passwords
    }

    pub(crate) fn auditor(&self) -> &Auditor {
        &self.auditor
    }
}
