//! In-memory [`CheckpointStore`] for tests and embedded use.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::{Result, StateError};
use crate::job::JobIdentity;

use super::{describe_current, CheckpointStore, Expected, StoredCheckpoint};

/// Checkpoints keyed by job identity, one version counter per job.
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<JobIdentity, StoredCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, job: &JobIdentity) -> Result<StoredCheckpoint> {
        self.checkpoints
            .read()
            .unwrap()
            .get(job)
            .cloned()
            .ok_or_else(|| StateError::NotFound(job.clone()))
    }

    async fn put(&self, checkpoint: &Checkpoint, expected: Expected) -> Result<u64> {
        let mut checkpoints = self.checkpoints.write().unwrap();
        let job = checkpoint.job_id();
        let current = checkpoints.get(job).map(|s| s.version);
        if !expected.matches(current) {
            return Err(StateError::Conflict {
                job: job.clone(),
                expected: expected.describe(),
                found: describe_current(current),
            });
        }
        let version = current.unwrap_or(0) + 1;
        checkpoints.insert(
            job.clone(),
            StoredCheckpoint {
                checkpoint: checkpoint.clone(),
                version,
            },
        );
        Ok(version)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
