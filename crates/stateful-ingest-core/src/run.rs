//! Run lifecycle: phases, transitions, and the per-run result.
//!
//! ```text
//! IDLE → RUNNING → STATE_BUILT → DIFFED → RECONCILING → COMMITTED
//!           │           │           │          │
//!           └───────────┴───────────┴──────────┴──→ FAILED
//! ```
//!
//! `DIFFED → COMMITTED` is allowed directly (nothing to reconcile, or
//! removal disabled). A checkpoint may only be written on entering
//! `COMMITTED`.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::reconcile::FailedRemoval;
use crate::urn::Urn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    StateBuilt,
    Diffed,
    Reconciling,
    Committed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Committed | RunPhase::Failed)
    }

    fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Idle, Running)
            | (Running, StateBuilt)
            | (StateBuilt, Diffed)
            | (Diffed, Reconciling)
            | (Diffed, Committed)
            | (Reconciling, Committed) => true,
            (Running | StateBuilt | Diffed | Reconciling, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::StateBuilt => "state_built",
            RunPhase::Diffed => "diffed",
            RunPhase::Reconciling => "reconciling",
            RunPhase::Committed => "committed",
            RunPhase::Failed => "failed",
        }
    }
}

/// Tracks the phase of one run and rejects illegal transitions.
#[derive(Debug)]
pub struct RunTracker {
    run_id: Uuid,
    phase: RunPhase,
    /// Last non-failed phase, reported when the run fails.
    last_active: RunPhase,
}

impl RunTracker {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            phase: RunPhase::Idle,
            last_active: RunPhase::Idle,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!(run_id = %self.run_id, from = self.phase.as_str(), to = next.as_str(), "Run phase");
        if next != RunPhase::Failed {
            self.last_active = next;
        }
        self.phase = next;
        Ok(())
    }

    /// Move to `FAILED` and return the phase the run failed in.
    pub fn fail(&mut self) -> RunPhase {
        if !self.phase.is_terminal() && self.phase != RunPhase::Idle {
            self.phase = RunPhase::Failed;
        }
        self.last_active
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The new checkpoint was written.
    Committed,
    /// The run finished without writing a checkpoint (dry run, or
    /// stateful ingestion disabled).
    Completed,
    /// The run stopped in `phase`; the stored checkpoint is untouched.
    Failed { phase: RunPhase },
}

/// Outcome of one `run_job` call, reported to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Entities observed by this run's scan.
    pub observed: usize,
    /// Entities emitted to the catalog.
    pub emitted: usize,
    /// Stale candidates found (including retried pending removals).
    pub stale_count: usize,
    /// Stale candidates in URN order.
    pub stale: Vec<Urn>,
    /// Entities soft-deleted in the catalog.
    pub removed: Vec<Urn>,
    /// Removals that failed; carried into the next checkpoint.
    pub failed_removals: Vec<FailedRemoval>,
    /// Human-readable errors and warnings, in the order they occurred.
    pub errors: Vec<String>,
}

impl RunResult {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed {
                phase: RunPhase::Idle,
            },
            observed: 0,
            emitted: 0,
            stale_count: 0,
            stale: Vec::new(),
            removed: Vec::new(),
            failed_removals: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == RunStatus::Committed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed { .. })
    }

    /// Stale candidates still present in the catalog after this run.
    pub fn pending_count(&self) -> usize {
        self.stale_count.saturating_sub(self.removed.len())
    }
}
