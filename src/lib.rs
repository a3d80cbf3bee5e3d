//! # Stateful Ingest
//!
//! Metadata ingestion with checkpointed stale-entity removal.
//!
//! Each pipeline scans one source (a SQLite database or a directory tree),
//! emits an entity per table, view or file to a metadata catalog, and
//! records what it observed in a checkpoint. The next run compares the
//! previous checkpoint with what it observes now; entities that vanished
//! are soft-deleted from the catalog before the new checkpoint is written.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │   Sources   │──▶│  Job runner  │──▶│   Catalog   │
//! │ SQLite / FS │   │ diff + remove│   │ local / HTTP│
//! └─────────────┘   └──────┬───────┘   └─────────────┘
//!                          │
//!                          ▼
//!                  ┌──────────────┐
//!                  │ Checkpoints  │
//!                  │ SQLite / cat │
//!                  └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sti init                        # create the state database
//! sti run warehouse               # ingest, diff and remove stale entities
//! sti run warehouse --dry-run     # show what would be removed
//! sti state show warehouse        # inspect the last checkpoint
//! sti entity get "urn:li:dataset:(urn:li:dataPlatform:sqlite,main.orders,PROD)"
//! sti serve catalog               # expose the local catalog over HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sources`] | Source trait and registry |
//! | [`source_sqlite`] | SQLite schema source |
//! | [`source_fs`] | Filesystem source |
//! | [`ingest`] | Job runner and `sti run` |
//! | [`sqlite_store`] | SQLite checkpoint store |
//! | [`local_catalog`] | SQLite-backed catalog |
//! | [`catalog_client`] | HTTP catalog client |
//! | [`backends`] | Catalog and store selection |
//! | [`server`] | Catalog HTTP service |
//!
//! The state model, diff, reconciliation and store trait live in the
//! [`stateful_ingest_core`] crate, re-exported as [`core`].

pub use stateful_ingest_core as core;

pub mod backends;
pub mod catalog_client;
pub mod config;
pub mod db;
pub mod get;
pub mod ingest;
pub mod local_catalog;
pub mod migrate;
pub mod server;
pub mod source_fs;
pub mod source_sqlite;
pub mod sources;
pub mod sqlite_store;
pub mod state_cmd;
