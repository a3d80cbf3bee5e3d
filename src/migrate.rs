use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per job identity; `version` drives compare-and-swap on commit.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_checkpoints (
            source_type TEXT NOT NULL,
            pipeline_name TEXT NOT NULL,
            task_name TEXT NOT NULL,
            version INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            config_fingerprint TEXT NOT NULL,
            checkpoint_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (source_type, pipeline_name, task_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Local catalog
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            urn TEXT PRIMARY KEY,
            entity_type TEXT,
            aspects_json TEXT NOT NULL DEFAULT '{}',
            system_metadata_json TEXT,
            removed INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_removed ON entities(removed)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entities_updated_at ON entities(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
