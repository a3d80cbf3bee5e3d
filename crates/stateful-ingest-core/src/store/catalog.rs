//! [`CheckpointStore`] that keeps checkpoints inside the catalog itself.
//!
//! Each job's checkpoint lives in the `ingestionCheckpoint` aspect of a
//! data-job entity derived from the job identity, so a pipeline needs no
//! storage of its own besides the catalog it already writes to.
//!
//! The version check is read-then-write. Two runners committing the same
//! job in the same instant can both pass it; the catalog has no
//! conditional upsert to close that window.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalog, EntitySnapshot};
use crate::checkpoint::Checkpoint;
use crate::error::{Result, StateError};
use crate::job::JobIdentity;
use crate::urn::Urn;

use super::{describe_current, CheckpointStore, Expected, StoredCheckpoint};

/// Aspect holding the serialized checkpoint on the job's entity.
pub const CHECKPOINT_ASPECT: &str = "ingestionCheckpoint";

#[derive(Serialize, Deserialize)]
struct CheckpointAspect {
    version: u64,
    checkpoint: Checkpoint,
}

/// Checkpoint store backed by a [`Catalog`].
pub struct CatalogCheckpointStore {
    catalog: Arc<dyn Catalog>,
    env: String,
}

impl CatalogCheckpointStore {
    pub fn new(catalog: Arc<dyn Catalog>, env: impl Into<String>) -> Self {
        Self {
            catalog,
            env: env.into(),
        }
    }

    /// Entity the checkpoint of `job` is attached to.
    pub fn anchor_urn(&self, job: &JobIdentity) -> Urn {
        Urn::data_job(&job.source_type, &job.pipeline_name, &self.env, &job.task_name)
    }

    async fn load(&self, job: &JobIdentity) -> Result<Option<StoredCheckpoint>> {
        let urn = self.anchor_urn(job);
        let Some(record) = self.catalog.get(&urn).await? else {
            return Ok(None);
        };
        let Some(value) = record.entity.aspects.get(CHECKPOINT_ASPECT) else {
            return Ok(None);
        };
        let aspect: CheckpointAspect = serde_json::from_value(value.clone())?;
        Ok(Some(StoredCheckpoint {
            checkpoint: aspect.checkpoint,
            version: aspect.version,
        }))
    }
}

#[async_trait]
impl CheckpointStore for CatalogCheckpointStore {
    async fn get(&self, job: &JobIdentity) -> Result<StoredCheckpoint> {
        self.load(job)
            .await?
            .ok_or_else(|| StateError::NotFound(job.clone()))
    }

    async fn put(&self, checkpoint: &Checkpoint, expected: Expected) -> Result<u64> {
        let job = checkpoint.job_id();
        let current = self.load(job).await?.map(|s| s.version);
        if !expected.matches(current) {
            return Err(StateError::Conflict {
                job: job.clone(),
                expected: expected.describe(),
                found: describe_current(current),
            });
        }

        let version = current.unwrap_or(0) + 1;
        let aspect = serde_json::to_value(CheckpointAspect {
            version,
            checkpoint: checkpoint.clone(),
        })?;
        let urn = self.anchor_urn(job);
        debug!(urn = %urn, version, "Writing checkpoint aspect");
        self.catalog
            .ingest(
                &EntitySnapshot::new(urn).with_aspect(CHECKPOINT_ASPECT, aspect),
                None,
            )
            .await?;
        Ok(version)
    }

    fn backend(&self) -> &'static str {
        "catalog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::checkpoint::ConfigSnapshot;
    use crate::state::IngestionState;
    use serde_json::json;
    use uuid::Uuid;

    fn job() -> JobIdentity {
        JobIdentity::new("mysql", "smoke", "stale_entity_removal")
    }

    fn checkpoint(tables: &[&str]) -> Checkpoint {
        let mut state = IngestionState::sql();
        for t in tables {
            state.add(Urn::dataset("mysql", &format!("datahub.{}", t), "PROD"));
        }
        Checkpoint::new(
            job(),
            Uuid::new_v4(),
            ConfigSnapshot::from_value(json!({"host_port": "localhost:3306"})),
            state,
        )
    }

    #[tokio::test]
    async fn round_trips_through_catalog_aspect() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = CatalogCheckpointStore::new(catalog.clone(), "PROD");

        assert!(matches!(
            store.get(&job()).await.unwrap_err(),
            StateError::NotFound(_)
        ));

        let cp = checkpoint(&["t1", "t2"]);
        assert_eq!(store.put(&cp, Expected::Absent).await.unwrap(), 1);

        let stored = store.get(&job()).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.checkpoint, cp);

        let anchor = catalog.get(&store.anchor_urn(&job())).await.unwrap().unwrap();
        assert_eq!(
            anchor.entity.urn.as_str(),
            "urn:li:dataJob:(urn:li:dataFlow:(mysql,smoke,PROD),stale_entity_removal)"
        );
        assert!(anchor.entity.aspects.contains_key(CHECKPOINT_ASPECT));
    }

    #[tokio::test]
    async fn version_precondition_is_checked() {
        let store = CatalogCheckpointStore::new(Arc::new(InMemoryCatalog::new()), "PROD");
        store.put(&checkpoint(&["t1"]), Expected::Absent).await.unwrap();

        let err = store
            .put(&checkpoint(&["t2"]), Expected::Version(7))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
        assert_eq!(store.put(&checkpoint(&["t2"]), Expected::Version(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn offline_catalog_is_retryable() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.set_reachable(false);
        let store = CatalogCheckpointStore::new(catalog, "PROD");
        let err = store.get(&job()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
