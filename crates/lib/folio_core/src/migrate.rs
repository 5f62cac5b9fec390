//! Database migration support.
//!
//! Embeds the schema under `folio_core/migrations/` and applies it at startup.

use sqlx::PgPool;

/// Apply all pending embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
