use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// What a migration run changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub newly_applied: Vec<i64>,
    pub current_version: Option<i64>,
}

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Runs pending migrations and reports which versions this call applied.
pub async fn apply(pool: &DbPool) -> Result<MigrationReport, MigrateError> {
    let before = applied_versions(pool).await?;
    MIGRATOR.run(pool).await?;
    let after = applied_versions(pool).await?;

    let newly_applied =
        after.iter().copied().filter(|version| !before.contains(version)).collect();
    Ok(MigrationReport { newly_applied, current_version: after.last().copied() })
}

async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, MigrateError> {
    let (tracked,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok(Vec::new());
    }

    let versions = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version",
    )
    .fetch_all(pool)
    .await?;
    Ok(versions)
}
