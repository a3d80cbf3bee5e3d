//! State differ: which entities disappeared since the previous run.
//!
//! `stale = previous − current`, over all entity categories of a state.
//! The result is a [`StaleSet`], an ordered set, so any list rendering is
//! in URN order and never depends on scan or insertion order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::error::{Result, StateError};
use crate::state::IngestionState;
use crate::urn::Urn;

/// Stale candidates of one run. Derived and ephemeral; never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleSet(BTreeSet<Urn>);

impl StaleSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.0.contains(urn)
    }

    /// Iterate in URN order.
    pub fn iter(&self) -> impl Iterator<Item = &Urn> {
        self.0.iter()
    }

    /// Sorted list rendering.
    pub fn to_sorted_vec(&self) -> Vec<Urn> {
        self.0.iter().cloned().collect()
    }

    /// Add previously failed removals that the current run still does not see.
    pub fn extend_pending(&mut self, pending: &BTreeSet<Urn>, current: &IngestionState) {
        self.0
            .extend(pending.iter().filter(|u| !current.contains(u)).cloned());
    }

    pub fn into_inner(self) -> BTreeSet<Urn> {
        self.0
    }
}

impl FromIterator<Urn> for StaleSet {
    fn from_iter<I: IntoIterator<Item = Urn>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Entities present in `previous` but absent from `current`.
///
/// Both states must be the same variant; a SQL state cannot be diffed
/// against a file-tree state.
pub fn stale_entities(previous: &IngestionState, current: &IngestionState) -> Result<StaleSet> {
    if previous.kind() != current.kind() {
        return Err(StateError::IncompatibleStates {
            previous: previous.kind(),
            current: current.kind(),
        });
    }

    Ok(previous
        .categories()
        .into_iter()
        .flatten()
        .filter(|urn| !current.contains(urn))
        .cloned()
        .collect())
}

/// Diff two checkpoints of the same job taken under the same config.
///
/// Fails with [`StateError::JobMismatch`] or [`StateError::ConfigMismatch`]
/// instead of returning a diff whose meaning is undefined.
pub fn stale_between(previous: &Checkpoint, current: &Checkpoint) -> Result<StaleSet> {
    if previous.job_id() != current.job_id() {
        return Err(StateError::JobMismatch {
            previous: previous.job_id().clone(),
            current: current.job_id().clone(),
        });
    }
    if previous.config() != current.config() {
        return Err(StateError::ConfigMismatch {
            job: current.job_id().clone(),
            previous: previous.config().short_fingerprint(),
            current: current.config().short_fingerprint(),
        });
    }

    let stale = stale_entities(previous.state(), current.state())?;
    debug!(
        job = %current.job_id(),
        previous = previous.state().len(),
        current = current.state().len(),
        stale = stale.len(),
        "Diffed checkpoints"
    );
    Ok(stale)
}

/// Policy gating stale-entity removal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StalePolicy {
    /// Opt-in: without it stale entities are reported, never removed.
    #[serde(default)]
    pub remove_stale_metadata: bool,
    /// Maximum share (percent) of previously observed entities one run may remove.
    #[serde(default = "default_fail_safe_threshold")]
    pub fail_safe_threshold: f64,
}

fn default_fail_safe_threshold() -> f64 {
    75.0
}

impl Default for StalePolicy {
    fn default() -> Self {
        Self {
            remove_stale_metadata: false,
            fail_safe_threshold: default_fail_safe_threshold(),
        }
    }
}

impl StalePolicy {
    /// Check the stale set against the fail-safe threshold.
    ///
    /// An empty previous state never trips. Removing every previously seen
    /// entity (the signature of an unreachable or misconfigured source) is
    /// 100% and trips any threshold below 100.
    pub fn check(&self, stale: &StaleSet, previous_len: usize) -> Result<()> {
        if previous_len == 0 || stale.is_empty() {
            return Ok(());
        }
        let percent = stale.len() as f64 / previous_len as f64 * 100.0;
        if percent > self.fail_safe_threshold {
            return Err(StateError::FailSafeTripped {
                stale: stale.len(),
                previous: previous_len,
                percent,
                threshold: self.fail_safe_threshold,
            });
        }
        Ok(())
    }
}
