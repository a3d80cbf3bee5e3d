//! Metadata sources.
//!
//! A [`Source`] scans one external system and, for every object it finds,
//! records the entity's URN into the run's
//! [`IngestionState`] and returns an [`EntitySnapshot`] to publish.
//!
//! | Type | Scans | Module |
//! |------|-------|--------|
//! | `sqlite` | Tables and views of a SQLite database | [`source_sqlite`](crate::source_sqlite) |
//! | `filesystem` | Files under a root directory | [`source_fs`](crate::source_fs) |

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use stateful_ingest_core::catalog::EntitySnapshot;
use stateful_ingest_core::state::IngestionState;

use crate::config::{Config, PipelineConfig, SourceConfig};
use crate::source_fs::FilesystemSource;
use crate::source_sqlite::SqliteSource;

/// A scanner feeding one ingestion pipeline.
#[async_trait]
pub trait Source: Send + Sync {
    /// Source type identifier (`"sqlite"`, `"filesystem"`). Part of the job identity.
    fn source_type(&self) -> &str;

    /// One-line description for `sti sources`.
    fn description(&self) -> String;

    /// Empty state of the variant this source fills.
    fn empty_state(&self) -> IngestionState;

    /// Whether the source is currently reachable. Cheap; no full scan.
    fn is_healthy(&self) -> bool;

    /// Scan the source.
    ///
    /// Every URN of a returned snapshot must also be recorded in `state`.
    /// Snapshots come back in URN order.
    async fn scan(&self, state: &mut IngestionState) -> Result<Vec<EntitySnapshot>>;
}

/// Build the source a pipeline is configured with.
pub fn build_source(pipeline: &PipelineConfig) -> Box<dyn Source> {
    match &pipeline.source {
        SourceConfig::Sqlite(cfg) => Box::new(SqliteSource::new(cfg.clone(), &pipeline.env)),
        SourceConfig::Filesystem(cfg) => {
            Box::new(FilesystemSource::new(cfg.clone(), &pipeline.env))
        }
    }
}

/// Status of one configured pipeline, as listed by `sti sources`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub pipeline: String,
    pub source_type: String,
    pub description: String,
    pub stateful: bool,
    pub remove_stale: bool,
    pub healthy: bool,
}

pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    config
        .pipelines
        .iter()
        .map(|(name, pipeline)| {
            let source = build_source(pipeline);
            SourceStatus {
                pipeline: name.clone(),
                source_type: source.source_type().to_string(),
                description: source.description(),
                stateful: pipeline.stateful_ingestion.enabled,
                remove_stale: pipeline.stateful_ingestion.enabled
                    && pipeline.stateful_ingestion.remove_stale_metadata,
                healthy: source.is_healthy(),
            }
        })
        .collect()
}

pub fn list_sources(config: &Config) -> Result<()> {
    let sources = get_sources(config);
    if sources.is_empty() {
        println!("No pipelines configured.");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<10} {:<14} HEALTHY",
        "PIPELINE", "TYPE", "STATEFUL", "REMOVE STALE"
    );
    for s in &sources {
        println!(
            "{:<20} {:<12} {:<10} {:<14} {}",
            s.pipeline, s.source_type, s.stateful, s.remove_stale, s.healthy
        );
    }
    for s in &sources {
        println!("  {}: {}", s.pipeline, s.description);
    }

    Ok(())
}
