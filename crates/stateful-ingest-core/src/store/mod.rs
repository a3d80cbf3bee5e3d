//! Checkpoint storage abstraction.
//!
//! The [`CheckpointStore`] trait is the whole contract the job runner has
//! with persistence: `get` the latest checkpoint of a job, `put` a new one.
//! Backends (in-memory, SQLite, catalog aspect) are interchangeable.
//!
//! Every stored checkpoint carries a store-assigned `version`. `put` takes
//! an [`Expected`] precondition so a run that loaded version `v` only
//! commits if nobody else committed in between.

pub mod catalog;
pub mod memory;

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::job::JobIdentity;

/// A checkpoint together with the version the store assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub checkpoint: Checkpoint,
    pub version: u64,
}

/// Compare-and-swap precondition for [`CheckpointStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// Overwrite unconditionally.
    Any,
    /// Only write if no checkpoint exists yet for the job.
    Absent,
    /// Only write if the stored checkpoint still has this version.
    Version(u64),
}

impl Expected {
    /// Precondition matching what a previous `get` returned.
    pub fn from_loaded(loaded: Option<&StoredCheckpoint>) -> Self {
        match loaded {
            Some(s) => Expected::Version(s.version),
            None => Expected::Absent,
        }
    }

    /// Check against the currently stored version (`None` = nothing stored).
    pub fn matches(self, current: Option<u64>) -> bool {
        match (self, current) {
            (Expected::Any, _) => true,
            (Expected::Absent, None) => true,
            (Expected::Version(v), Some(c)) => v == c,
            _ => false,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Expected::Any => "any".to_string(),
            Expected::Absent => "absent".to_string(),
            Expected::Version(v) => format!("version {}", v),
        }
    }
}

/// Human form of a stored version for conflict messages.
pub fn describe_current(current: Option<u64>) -> String {
    match current {
        Some(v) => format!("version {}", v),
        None => "absent".to_string(),
    }
}

/// Durable per-job checkpoint storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CheckpointStore::get) | Latest checkpoint, or `NotFound` on a first run |
/// | [`put`](CheckpointStore::put) | Replace the job's checkpoint, returns the new version |
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint of `job`.
    ///
    /// Fails with [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the job has never committed.
    async fn get(&self, job: &JobIdentity) -> Result<StoredCheckpoint>;

    /// Persist `checkpoint` under its own job identity.
    ///
    /// Durable before returning. Fails with
    /// [`StateError::Conflict`](crate::error::StateError::Conflict) when
    /// `expected` does not match, leaving the stored checkpoint untouched.
    async fn put(&self, checkpoint: &Checkpoint, expected: Expected) -> Result<u64>;

    /// Short backend name for logs and reports.
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_matching() {
        assert!(Expected::Any.matches(None));
        assert!(Expected::Any.matches(Some(3)));
        assert!(Expected::Absent.matches(None));
        assert!(!Expected::Absent.matches(Some(1)));
        assert!(Expected::Version(2).matches(Some(2)));
        assert!(!Expected::Version(2).matches(Some(3)));
        assert!(!Expected::Version(2).matches(None));
    }
}
