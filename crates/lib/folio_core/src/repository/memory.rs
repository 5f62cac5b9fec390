//! In-memory repository backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuditLog, OAuthTokenRepository, RepositoryError, UserRepository};
use crate::models::auth::{AuthEvent, BackupCodeUse, User};
use crate::models::oauth::{OAuthTokenRecord, ProviderKind};

#[derive(Debug, Clone)]
struct StoredBackupCode {
    code_hash: String,
    used_at: Option<DateTime<Utc>>,
}

/// Implements every repository trait over process memory.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    backup_codes: RwLock<HashMap<Uuid, Vec<StoredBackupCode>>>,
    oauth_tokens: DashMap<(Uuid, ProviderKind), OAuthTokenRecord>,
    events: RwLock<Vec<AuthEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded audit events, oldest first.
    pub async fn events(&self) -> Vec<AuthEvent> {
        self.events.read().await.clone()
    }

    fn active(user: Option<&User>) -> Result<User, RepositoryError> {
        match user {
            None => Err(RepositoryError::NotFound),
            Some(u) if !u.is_active => Err(RepositoryError::Inactive),
            Some(u) => Ok(u.clone()),
        }
    }
}

/// Email and username are unique, case-insensitively.
fn unique(users: &HashMap<Uuid, User>, user: &User) -> Result<(), RepositoryError> {
    for existing in users.values() {
        if existing.email.eq_ignore_ascii_case(&user.email) {
            return Err(RepositoryError::Conflict("email".into()));
        }
        if existing.username.eq_ignore_ascii_case(&user.username) {
            return Err(RepositoryError::Conflict("username".into()));
        }
    }
    Ok(())
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        let users = self.users.read().await;
        Self::active(users.values().find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn find_by_username(&self, username: &str) -> Result<User, RepositoryError> {
        let users = self.users.read().await;
        Self::active(
            users
                .values()
                .find(|u| u.username.eq_ignore_ascii_case(username)),
        )
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, RepositoryError> {
        let users = self.users.read().await;
        Self::active(users.get(&id))
    }

    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict("id".into()));
        }
        unique(&users, user)?;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.id) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn count_admins(&self) -> Result<u64, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().filter(|u| u.is_admin()).count() as u64)
    }

    async fn install_first_admin(&self, user: &User) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.is_admin()) {
            return Ok(false);
        }
        if !users.contains_key(&user.id) {
            unique(&users, user)?;
        }
        users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        code_hashes: &[String],
    ) -> Result<(), RepositoryError> {
        let codes = code_hashes
            .iter()
            .map(|h| StoredBackupCode {
                code_hash: h.clone(),
                used_at: None,
            })
            .collect();
        self.backup_codes.write().await.insert(user_id, codes);
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<BackupCodeUse, RepositoryError> {
        let mut all = self.backup_codes.write().await;
        let Some(codes) = all.get_mut(&user_id) else {
            return Ok(BackupCodeUse::Unknown);
        };
        match codes.iter_mut().find(|c| c.code_hash == code_hash) {
            None => Ok(BackupCodeUse::Unknown),
            Some(code) if code.used_at.is_some() => Ok(BackupCodeUse::AlreadyUsed),
            Some(code) => {
                code.used_at = Some(Utc::now());
                Ok(BackupCodeUse::Consumed)
            }
        }
    }
}

#[async_trait]
impl OAuthTokenRepository for MemoryStore {
    async fn upsert(&self, record: &OAuthTokenRecord) -> Result<(), RepositoryError> {
        let mut record = record.clone();
        let key = (record.user_id, record.provider);
        // A refresh without a new refresh token keeps the old one.
        if record.refresh_token_enc.is_none() {
            if let Some(existing) = self.oauth_tokens.get(&key) {
                record.refresh_token_enc = existing.refresh_token_enc.clone();
            }
        }
        self.oauth_tokens.insert(key, record);
        Ok(())
    }

    async fn find(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Option<OAuthTokenRecord>, RepositoryError> {
        Ok(self
            .oauth_tokens
            .get(&(user_id, provider))
            .map(|r| r.value().clone()))
    }

    async fn delete(&self, user_id: Uuid, provider: ProviderKind) -> Result<bool, RepositoryError> {
        Ok(self.oauth_tokens.remove(&(user_id, provider)).is_some())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn record(&self, event: &AuthEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}
