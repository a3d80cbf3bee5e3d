//! SQLite-backed [`CheckpointStore`].
//!
//! One row per job identity in `ingestion_checkpoints`. A commit reads the
//! current version and writes with `WHERE version = ?` inside one
//! transaction, so a concurrent writer that got there first turns this
//! write into a [`StateError::Conflict`] instead of a lost update.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use stateful_ingest_core::checkpoint::Checkpoint;
use stateful_ingest_core::error::{Result, StateError};
use stateful_ingest_core::job::JobIdentity;
use stateful_ingest_core::store::{
    describe_current, CheckpointStore, Expected, StoredCheckpoint,
};

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StateError {
    StateError::Backend(e.to_string())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, job: &JobIdentity) -> Result<StoredCheckpoint> {
        let row = sqlx::query(
            "SELECT version, checkpoint_json FROM ingestion_checkpoints \
             WHERE source_type = ? AND pipeline_name = ? AND task_name = ?",
        )
        .bind(&job.source_type)
        .bind(&job.pipeline_name)
        .bind(&job.task_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let row = row.ok_or_else(|| StateError::NotFound(job.clone()))?;
        let version: i64 = row.get("version");
        let json: String = row.get("checkpoint_json");

        Ok(StoredCheckpoint {
            checkpoint: Checkpoint::from_json(&json)?,
            version: version as u64,
        })
    }

    async fn put(&self, checkpoint: &Checkpoint, expected: Expected) -> Result<u64> {
        let job = checkpoint.job_id();
        let json = checkpoint.to_json()?;
        let fingerprint = checkpoint.config().fingerprint();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Take the write lock before reading the version.
        sqlx::query(
            "UPDATE ingestion_checkpoints SET version = version \
             WHERE source_type = ? AND pipeline_name = ? AND task_name = ?",
        )
        .bind(&job.source_type)
        .bind(&job.pipeline_name)
        .bind(&job.task_name)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM ingestion_checkpoints \
             WHERE source_type = ? AND pipeline_name = ? AND task_name = ?",
        )
        .bind(&job.source_type)
        .bind(&job.pipeline_name)
        .bind(&job.task_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let conflict = |found: Option<i64>| StateError::Conflict {
            job: job.clone(),
            expected: expected.describe(),
            found: describe_current(found.map(|v| v as u64)),
        };

        if !expected.matches(current.map(|v| v as u64)) {
            return Err(conflict(current));
        }

        let version = current.unwrap_or(0) + 1;
        let written = match current {
            None => sqlx::query(
                r#"
                INSERT INTO ingestion_checkpoints
                    (source_type, pipeline_name, task_name, version, run_id,
                     config_fingerprint, checkpoint_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_type, pipeline_name, task_name) DO NOTHING
                "#,
            )
            .bind(&job.source_type)
            .bind(&job.pipeline_name)
            .bind(&job.task_name)
            .bind(version)
            .bind(checkpoint.run_id().to_string())
            .bind(&fingerprint)
            .bind(&json)
            .bind(checkpoint.created_at().timestamp())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?,
            Some(prev) => sqlx::query(
                r#"
                UPDATE ingestion_checkpoints
                SET version = ?, run_id = ?, config_fingerprint = ?,
                    checkpoint_json = ?, created_at = ?, updated_at = ?
                WHERE source_type = ? AND pipeline_name = ? AND task_name = ?
                  AND version = ?
                "#,
            )
            .bind(version)
            .bind(checkpoint.run_id().to_string())
            .bind(&fingerprint)
            .bind(&json)
            .bind(checkpoint.created_at().timestamp())
            .bind(now)
            .bind(&job.source_type)
            .bind(&job.pipeline_name)
            .bind(&job.task_name)
            .bind(prev)
            .execute(&mut *tx)
            .await
            .map_err(backend)?,
        };

        if written.rows_affected() != 1 {
            return Err(conflict(current));
        }

        tx.commit().await.map_err(backend)?;
        debug!(job = %job, version, "Committed checkpoint");
        Ok(version as u64)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stateful_ingest_core::checkpoint::ConfigSnapshot;
    use stateful_ingest_core::state::IngestionState;
    use stateful_ingest_core::urn::Urn;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn store() -> (TempDir, SqliteCheckpointStore) {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("state.sqlite").display());
        let pool = SqlitePool::connect(&url).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (tmp, SqliteCheckpointStore::new(pool))
    }

    fn job() -> JobIdentity {
        JobIdentity::new("sqlite", "warehouse", "stale_entity_removal")
    }

    fn checkpoint(tables: &[&str]) -> Checkpoint {
        let mut state = IngestionState::sql();
        for t in tables {
            state.add(Urn::dataset("sqlite", &format!("warehouse.{}", t), "PROD"));
        }
        Checkpoint::new(
            job(),
            Uuid::new_v4(),
            ConfigSnapshot::from_value(json!({"path": "/data/warehouse.sqlite"})),
            state,
        )
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let (_tmp, store) = store().await;
        assert!(matches!(
            store.get(&job()).await.unwrap_err(),
            StateError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn put_get_and_supersede() {
        let (_tmp, store) = store().await;
        let first = checkpoint(&["t1", "t2"]);
        assert_eq!(store.put(&first, Expected::Absent).await.unwrap(), 1);

        let loaded = store.get(&job()).await.unwrap();
        assert_eq!(loaded.checkpoint, first);

        let second = checkpoint(&["t2"]).with_pending_removals([Urn::new("urn:li:x").unwrap()]);
        assert_eq!(
            store.put(&second, Expected::from_loaded(Some(&loaded))).await.unwrap(),
            2
        );
        let loaded = store.get(&job()).await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.checkpoint.pending_removals().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let (_tmp, store) = store().await;
        let first = checkpoint(&["t1"]);
        store.put(&first, Expected::Absent).await.unwrap();
        store.put(&checkpoint(&["t1", "t2"]), Expected::Version(1)).await.unwrap();

        let err = store
            .put(&checkpoint(&[]), Expected::Version(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
        assert!(err
            .to_string()
            .contains("expected version 1, found version 2"));

        let err = store.put(&first, Expected::Absent).await.unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));

        let stored = store.get(&job()).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.checkpoint.state().len(), 2);
    }

    #[tokio::test]
    async fn jobs_are_isolated() {
        let (_tmp, store) = store().await;
        store.put(&checkpoint(&["t1"]), Expected::Absent).await.unwrap();

        let other = JobIdentity::new("sqlite", "other", "stale_entity_removal");
        assert!(store.get(&other).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_commits_have_one_winner() {
        let (_tmp, store) = store().await;
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put(&checkpoint(&["t1"]), Expected::Absent).await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, 1);
                    committed += 1;
                }
                Err(e) => assert!(matches!(e, StateError::Conflict { .. }), "{}", e),
            }
        }
        assert_eq!(committed, 1);
        assert_eq!(store.get(&job()).await.unwrap().version, 1);
    }
}
