use sqlx::{Pool, Sqlite};
use tracing::info;

const MIGRATION_001_INITIAL: &str = include_str!("../migrations/001_initial.sql");

/// Applies the embedded schema. Every statement is idempotent.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    info!("Running migration 001: torrents table");
    sqlx::query(MIGRATION_001_INITIAL).execute(pool).await?;
    Ok(())
}
