//! Checkpoints: a run's observed state bound to its configuration and time.
//!
//! A [`Checkpoint`] is immutable once built. The next successful run
//! supersedes it with a new checkpoint; nothing ever mutates a stored one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::job::JobIdentity;
use crate::state::IngestionState;
use crate::urn::Urn;

/// Canonical, structurally comparable snapshot of a run's configuration.
///
/// Stored as a `serde_json::Value`, whose maps are key-sorted, so two
/// snapshots of equal configs compare equal and fingerprint identically
/// regardless of field order in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSnapshot(serde_json::Value);

impl ConfigSnapshot {
    /// Snapshot any serializable config value.
    pub fn capture<T: Serialize>(config: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(config)?))
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Hex SHA-256 of the canonical JSON encoding.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// First 12 hex chars of [`fingerprint`](Self::fingerprint), for logs.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint()[..12].to_string()
    }
}

/// Immutable record of one committed ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    job_id: JobIdentity,
    run_id: Uuid,
    config: ConfigSnapshot,
    state: IngestionState,
    /// Stale candidates whose removal failed in the producing run.
    #[serde(default)]
    pending_removals: BTreeSet<Urn>,
    created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        job_id: JobIdentity,
        run_id: Uuid,
        config: ConfigSnapshot,
        state: IngestionState,
    ) -> Self {
        Self {
            job_id,
            run_id,
            config,
            state,
            pending_removals: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach removals that must be retried by the next run.
    ///
    /// URNs the state itself still contains are dropped: they are live again.
    pub fn with_pending_removals(mut self, pending: impl IntoIterator<Item = Urn>) -> Self {
        self.pending_removals = pending
            .into_iter()
            .filter(|urn| !self.state.contains(urn))
            .collect();
        self
    }

    pub fn job_id(&self) -> &JobIdentity {
        &self.job_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn state(&self) -> &IngestionState {
        &self.state
    }

    pub fn pending_removals(&self) -> &BTreeSet<Urn> {
        &self.pending_removals
    }

    /// Entities this checkpoint still answers for: everything observed plus
    /// removals that are still pending. The fail-safe ratio is taken over
    /// this population, since the next run's stale set is drawn from it.
    pub fn tracked_len(&self) -> usize {
        self.state.len()
            + self
                .pending_removals
                .iter()
                .filter(|urn| !self.state.contains(urn))
                .count()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
