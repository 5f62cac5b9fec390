//! PostgreSQL repository backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{AuditLog, OAuthTokenRepository, RepositoryError, UserRepository};
use crate::models::auth::{AuthEvent, BackupCodeUse, Role, User};
use crate::models::oauth::{OAuthTokenRecord, ProviderKind};

const USER_COLUMNS: &str = "id, email, username, full_name, password_hash, role, is_active, \
     is_verified, avatar_url, totp_secret, totp_enabled, oauth_provider, oauth_provider_id, \
     last_login_at, created_at, updated_at";

/// Advisory lock key held while the first admin is installed.
const FIRST_ADMIN_LOCK: i64 = 0x666f_6c69_6f01;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    username: String,
    full_name: Option<String>,
    password_hash: Option<String>,
    role: String,
    is_active: bool,
    is_verified: bool,
    avatar_url: Option<String>,
    totp_secret: Option<String>,
    totp_enabled: bool,
    oauth_provider: Option<String>,
    oauth_provider_id: Option<String>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(RepositoryError::Backend)?;
        Ok(User {
            id: row.id,
            email: row.email,
            username: row.username,
            full_name: row.full_name,
            password_hash: row.password_hash,
            role,
            is_active: row.is_active,
            is_verified: row.is_verified,
            avatar_url: row.avatar_url,
            totp_secret: row.totp_secret,
            totp_enabled: row.totp_enabled,
            oauth_provider: row.oauth_provider,
            oauth_provider_id: row.oauth_provider_id,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Implements every repository trait over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_one(&self, predicate: &str, bind: &str) -> Result<User, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        active(row)
    }
}

fn active(row: Option<UserRow>) -> Result<User, RepositoryError> {
    match row {
        None => Err(RepositoryError::NotFound),
        Some(r) if !r.is_active => Err(RepositoryError::Inactive),
        Some(r) => User::try_from(r),
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        self.find_one("lower(email) = lower($1)", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<User, RepositoryError> {
        self.find_one("lower(username) = lower($1)", username).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        active(row)
    }

    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, email, username, full_name, password_hash, role, is_active, \
             is_verified, avatar_url, totp_secret, totp_enabled, oauth_provider, \
             oauth_provider_id, last_login_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(&user.avatar_url)
        .bind(&user.totp_secret)
        .bind(user.totp_enabled)
        .bind(&user.oauth_provider)
        .bind(&user.oauth_provider_id)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE users SET email = $2, username = $3, full_name = $4, password_hash = $5, \
             role = $6, is_active = $7, is_verified = $8, avatar_url = $9, totp_secret = $10, \
             totp_enabled = $11, oauth_provider = $12, oauth_provider_id = $13, \
             last_login_at = $14, updated_at = $15 \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(&user.avatar_url)
        .bind(&user.totp_secret)
        .bind(user.totp_enabled)
        .bind(&user.oauth_provider)
        .bind(&user.oauth_provider_id)
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn count_admins(&self) -> Result<u64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn install_first_admin(&self, user: &User) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        // Serializes concurrent bootstraps across every instance sharing the database.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(FIRST_ADMIN_LOCK)
            .execute(&mut *tx)
            .await?;
        let admins = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&mut *tx)
            .await?;
        if admins > 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO users (id, email, username, full_name, password_hash, role, is_active, \
             is_verified, avatar_url, totp_secret, totp_enabled, oauth_provider, \
             oauth_provider_id, last_login_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (id) DO UPDATE SET password_hash = EXCLUDED.password_hash, \
             role = EXCLUDED.role, is_verified = EXCLUDED.is_verified, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(&user.avatar_url)
        .bind(&user.totp_secret)
        .bind(user.totp_enabled)
        .bind(&user.oauth_provider)
        .bind(&user.oauth_provider_id)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        code_hashes: &[String],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mfa_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for hash in code_hashes {
            sqlx::query(
                "INSERT INTO mfa_backup_codes (id, user_id, code_hash) VALUES ($1, $2, $3)",
            )
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<BackupCodeUse, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE mfa_backup_codes SET used_at = now() \
             WHERE user_id = $1 AND code_hash = $2 AND used_at IS NULL",
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 1 {
            return Ok(BackupCodeUse::Consumed);
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM mfa_backup_codes WHERE user_id = $1 AND code_hash = $2)",
        )
        .bind(user_id)
        .bind(code_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(if exists {
            BackupCodeUse::AlreadyUsed
        } else {
            BackupCodeUse::Unknown
        })
    }
}

#[derive(sqlx::FromRow)]
struct OAuthTokenRow {
    user_id: Uuid,
    provider: String,
    access_token_enc: String,
    refresh_token_enc: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    scope: Option<String>,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl OAuthTokenRepository for PgStore {
    async fn upsert(&self, record: &OAuthTokenRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO oauth_tokens \
             (user_id, provider, access_token_enc, refresh_token_enc, expires_at, scope, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, provider) DO UPDATE SET \
               access_token_enc = EXCLUDED.access_token_enc, \
               refresh_token_enc = COALESCE(EXCLUDED.refresh_token_enc, oauth_tokens.refresh_token_enc), \
               expires_at = EXCLUDED.expires_at, \
               scope = EXCLUDED.scope, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(record.user_id)
        .bind(record.provider.as_str())
        .bind(&record.access_token_enc)
        .bind(&record.refresh_token_enc)
        .bind(record.expires_at)
        .bind(&record.scope)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Option<OAuthTokenRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, OAuthTokenRow>(
            "SELECT user_id, provider, access_token_enc, refresh_token_enc, expires_at, scope, \
             updated_at FROM oauth_tokens WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(OAuthTokenRecord {
                user_id: r.user_id,
                provider: r.provider.parse().map_err(RepositoryError::Backend)?,
                access_token_enc: r.access_token_enc,
                refresh_token_enc: r.refresh_token_enc,
                expires_at: r.expires_at,
                scope: r.scope,
                updated_at: r.updated_at,
            })
        })
        .transpose()
    }

    async fn delete(&self, user_id: Uuid, provider: ProviderKind) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn record(&self, event: &AuthEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO auth_events (id, user_id, kind, success, detail, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.kind.as_str())
        .bind(event.success)
        .bind(&event.detail)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
