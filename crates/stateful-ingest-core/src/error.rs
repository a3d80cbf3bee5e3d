//! Error types for stateful ingestion.
//!
//! Two families:
//! - [`StateError`]: checkpoint, diff, and run-level failures.
//! - [`CatalogError`]: failures talking to the metadata catalog.
//!
//! Expected conditions (`NotFound` on a first run, `ConfigMismatch` after a
//! config change) are ordinary variants; callers match on them and continue.

use std::time::Duration;

use thiserror::Error;

use crate::job::JobIdentity;
use crate::run::RunPhase;

/// Top-level error type for checkpointing and stale-entity removal.
#[derive(Debug, Error)]
pub enum StateError {
    // ═══════════════════════════════════════════════════════════════════
    // Expected: the caller decides how to continue
    // ═══════════════════════════════════════════════════════════════════
    #[error("no checkpoint stored for job {0}")]
    NotFound(JobIdentity),

    #[error("config snapshot changed for job {job} (previous {previous}, current {current})")]
    ConfigMismatch {
        job: JobIdentity,
        previous: String,
        current: String,
    },

    #[error("cannot diff a '{previous}' state against a '{current}' state")]
    IncompatibleStates {
        previous: &'static str,
        current: &'static str,
    },

    #[error("checkpoints belong to different jobs: {previous} vs {current}")]
    JobMismatch {
        previous: JobIdentity,
        current: JobIdentity,
    },

    #[error(
        "fail-safe tripped: {stale} of {previous} entities ({percent:.1}%) would be removed, threshold is {threshold:.1}%"
    )]
    FailSafeTripped {
        stale: usize,
        previous: usize,
        percent: f64,
        threshold: f64,
    },

    #[error("invalid URN: {0:?}")]
    InvalidUrn(String),

    // ═══════════════════════════════════════════════════════════════════
    // Infrastructure: retryable with backoff
    // ═══════════════════════════════════════════════════════════════════
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("catalog unreachable: {0}")]
    Connectivity(String),

    // ═══════════════════════════════════════════════════════════════════
    // Store / invariant failures
    // ═══════════════════════════════════════════════════════════════════
    #[error("checkpoint for job {job} changed concurrently (expected {expected}, found {found})")]
    Conflict {
        job: JobIdentity,
        expected: String,
        found: String,
    },

    #[error("illegal run transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunPhase, to: RunPhase },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint backend error: {0}")]
    Backend(String),
}

impl StateError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connectivity(_))
    }
}

impl From<CatalogError> for StateError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Timeout(d) => StateError::Timeout(d),
            CatalogError::Unreachable(msg) => StateError::Connectivity(msg),
            other => StateError::Backend(other.to_string()),
        }
    }
}

/// Errors returned by a [`Catalog`](crate::catalog::Catalog) implementation.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unreachable: {0}")]
    Unreachable(String),

    #[error("catalog request timed out after {0:?}")]
    Timeout(Duration),

    #[error("catalog rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("invalid catalog response: {0}")]
    InvalidResponse(String),
}

impl CatalogError {
    /// Connectivity-class failures: the request never got a verdict.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Result type alias for stateful ingestion.
pub type Result<T> = std::result::Result<T, StateError>;
