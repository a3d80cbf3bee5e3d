//! `sti state show <pipeline>`: summary of the latest committed checkpoint.

use anyhow::Result;
use serde::Serialize;

use stateful_ingest_core::error::StateError;
use stateful_ingest_core::job::JobIdentity;
use stateful_ingest_core::state::IngestionState;
use stateful_ingest_core::urn::Urn;

use crate::backends;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sources::build_source;

/// Checkpoint summary, also the `--json` output shape.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub job: String,
    pub backend: String,
    pub version: u64,
    pub run_id: String,
    pub created_at: String,
    pub config_fingerprint: String,
    pub kind: String,
    pub observed: String,
    pub entities: Vec<Urn>,
    pub pending_removals: Vec<Urn>,
}

/// Latest checkpoint of a pipeline, or `None` before its first commit.
pub async fn get_checkpoint_summary(
    config: &Config,
    name: &str,
) -> Result<Option<CheckpointSummary>> {
    let pipeline = config.pipeline(name)?;
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let catalog = backends::create_catalog(config, &pool)?;
    let store = backends::create_store(pipeline, catalog, &pool)?;
    let source = build_source(pipeline);
    let job = JobIdentity::new(
        source.source_type(),
        name,
        &pipeline.stateful_ingestion.task_name,
    );

    let loaded = store.get(&job).await;
    pool.close().await;

    let stored = match loaded {
        Ok(s) => s,
        Err(StateError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let cp = &stored.checkpoint;

    Ok(Some(CheckpointSummary {
        job: job.to_string(),
        backend: store.backend().to_string(),
        version: stored.version,
        run_id: cp.run_id().to_string(),
        created_at: cp.created_at().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        config_fingerprint: cp.config().short_fingerprint(),
        kind: cp.state().kind().to_string(),
        observed: describe_state(cp.state()),
        entities: cp.state().entities().into_iter().cloned().collect(),
        pending_removals: cp.pending_removals().iter().cloned().collect(),
    }))
}

pub async fn run_state_show(config: &Config, name: &str, as_json: bool) -> Result<()> {
    let summary = get_checkpoint_summary(config, name).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let Some(s) = summary else {
        println!("No checkpoint committed for pipeline '{}' yet.", name);
        return Ok(());
    };

    println!("--- Checkpoint ---");
    println!("job:          {}", s.job);
    println!("backend:      {}", s.backend);
    println!("version:      {}", s.version);
    println!("run_id:       {}", s.run_id);
    println!("created_at:   {}", s.created_at);
    println!("config:       {}", s.config_fingerprint);
    println!("kind:         {}", s.kind);
    println!("observed:     {}", s.observed);
    println!();

    println!("--- Entities ({}) ---", s.entities.len());
    for urn in &s.entities {
        println!("{}", urn);
    }

    if !s.pending_removals.is_empty() {
        println!();
        println!("--- Pending removals ({}) ---", s.pending_removals.len());
        for urn in &s.pending_removals {
            println!("{}", urn);
        }
    }

    Ok(())
}

/// Count of observed entities per category.
pub fn describe_state(state: &IngestionState) -> String {
    match state {
        IngestionState::Sql(s) => format!("{} tables, {} views", s.tables.len(), s.views.len()),
        IngestionState::FileTree(s) => format!("{} files", s.files.len()),
    }
}
