//! Persistence contracts consumed by the auth services.
//!
//! Two backends implement them: [`memory::MemoryStore`] for tests and
//! single-process development, and [`postgres::PgStore`] for deployments.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{AuthEvent, BackupCodeUse, User};
use crate::models::oauth::{OAuthTokenRecord, ProviderKind};

/// Repository errors. `NotFound` and `Inactive` are deliberately distinct.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,

    #[error("account inactive")]
    Inactive,

    #[error("conflict on {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// Transient failures worth a bounded retry on idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Backend(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.constraint().unwrap_or("unique").to_string())
            }
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}

/// User persistence.
///
/// Lookups are scoped to active users: an inactive match yields
/// [`RepositoryError::Inactive`], no match yields [`RepositoryError::NotFound`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<User, RepositoryError>;

    async fn find_by_username(&self, username: &str) -> Result<User, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<User, RepositoryError>;

    /// Insert a new user. Duplicate email or username is a `Conflict`.
    async fn create(&self, user: &User) -> Result<(), RepositoryError>;

    /// Overwrite an existing user (active or not).
    async fn save(&self, user: &User) -> Result<(), RepositoryError>;

    async fn count_admins(&self) -> Result<u64, RepositoryError>;

    /// Insert `user`, or overwrite the row with its id, but only while no
    /// admin exists. The check and the write are atomic; `Ok(false)` means
    /// another admin got there first and nothing was written.
    async fn install_first_admin(&self, user: &User) -> Result<bool, RepositoryError>;

    /// Replace the user's backup codes with a fresh set of hashes.
    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        code_hashes: &[String],
    ) -> Result<(), RepositoryError>;

    /// Mark one backup code used. Atomic: concurrent callers with the same
    /// code see exactly one `Consumed`.
    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<BackupCodeUse, RepositoryError>;
}

/// Provider token persistence, one row per (user, provider).
#[async_trait]
pub trait OAuthTokenRepository: Send + Sync {
    async fn upsert(&self, record: &OAuthTokenRecord) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Option<OAuthTokenRecord>, RepositoryError>;

    /// Remove the stored tokens. Returns whether a row existed.
    async fn delete(&self, user_id: Uuid, provider: ProviderKind) -> Result<bool, RepositoryError>;
}

/// Append-only security event log.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &AuthEvent) -> Result<(), RepositoryError>;
}
