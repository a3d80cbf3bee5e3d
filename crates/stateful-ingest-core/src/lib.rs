//! # Stateful Ingest Core
//!
//! Runtime-agnostic logic for stateful ingestion: entity URNs, ingestion
//! state, checkpoints, the state differ, the stale-entity reconciler, and
//! the storage and catalog traits they sit on.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. Concrete
//! backends (SQLite checkpoint store, HTTP catalog client) live in the
//! `stateful-ingest` crate and implement the traits defined here.
//!
//! ## Flow of one run
//!
//! ```text
//! scan ──▶ IngestionState ──▶ Checkpoint ─┐
//!                                         ├─▶ stale_between ─▶ StaleSet ─▶ Reconciler
//! CheckpointStore::get ──▶ previous ──────┘
//! ```
//!
//! The entities recorded by the previous checkpoint but absent from the
//! current one are *stale*; with removal enabled they are soft-deleted
//! from the [`catalog::Catalog`], and the new checkpoint is committed.

pub mod catalog;
pub mod checkpoint;
pub mod diff;
pub mod error;
pub mod job;
pub mod reconcile;
pub mod run;
pub mod state;
pub mod store;
pub mod urn;

pub use catalog::{Catalog, EntityRecord, EntitySnapshot, SystemMetadata};
pub use checkpoint::{Checkpoint, ConfigSnapshot};
pub use diff::{stale_between, stale_entities, StalePolicy, StaleSet};
pub use error::{CatalogError, Result, StateError};
pub use job::JobIdentity;
pub use reconcile::{FailedRemoval, ReconcileOutcome, Reconciler};
pub use run::{RunPhase, RunResult, RunStatus, RunTracker};
pub use state::IngestionState;
pub use store::{CheckpointStore, Expected, StoredCheckpoint};
pub use urn::Urn;
