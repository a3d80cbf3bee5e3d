//! Job runner: one stateful ingestion run, end to end.
//!
//! ```text
//! RUNNING      scan the source, emit every entity to the catalog
//! STATE_BUILT  load the previous checkpoint (NotFound → first run)
//! DIFFED       previous − current, plus removals still pending
//! RECONCILING  soft-delete stale entities (opt-in, fail-safe guarded)
//! COMMITTED    write the new checkpoint, CAS against the loaded version
//! ```
//!
//! The checkpoint is written last. Any failure before that leaves the
//! stored checkpoint as it was, so the next run diffs against the same
//! baseline; soft deletes are idempotent, so repeating them is harmless.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use stateful_ingest_core::catalog::{Catalog, SystemMetadata};
use stateful_ingest_core::checkpoint::{Checkpoint, ConfigSnapshot};
use stateful_ingest_core::diff::{stale_between, StalePolicy, StaleSet};
use stateful_ingest_core::error::StateError;
use stateful_ingest_core::job::JobIdentity;
use stateful_ingest_core::reconcile::Reconciler;
use stateful_ingest_core::run::{RunPhase, RunResult, RunStatus, RunTracker};
use stateful_ingest_core::store::{CheckpointStore, Expected, StoredCheckpoint};

use crate::backends;
use crate::config::{Config, PipelineConfig};
use crate::db;
use crate::migrate;
use crate::sources::{build_source, Source};

/// How a run is carried out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Load, diff and commit checkpoints. Off: scan and emit only.
    pub stateful: bool,
    /// Scan and diff, but emit, remove and commit nothing.
    pub dry_run: bool,
}

/// Runs ingestion jobs against one checkpoint store and one catalog.
pub struct JobRunner<'a> {
    store: &'a dyn CheckpointStore,
    catalog: &'a dyn Catalog,
    policy: StalePolicy,
    store_timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl<'a> JobRunner<'a> {
    pub fn new(store: &'a dyn CheckpointStore, catalog: &'a dyn Catalog, policy: StalePolicy) -> Self {
        Self {
            store,
            catalog,
            policy,
            store_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Duration::from_secs(1),
        }
    }

    /// Per-attempt timeout and retry budget for checkpoint store calls.
    pub fn with_store_limits(mut self, timeout: Duration, max_retries: u32) -> Self {
        self.store_timeout = timeout;
        self.max_retries = max_retries;
        self
    }

    /// First backoff delay; doubles per attempt, capped at 32x.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Execute one run of `job`. Never panics on infrastructure errors:
    /// they end up in the returned [`RunResult`] as `Failed { phase }`.
    pub async fn run_job(
        &self,
        job: &JobIdentity,
        config: ConfigSnapshot,
        source: &dyn Source,
        options: RunOptions,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let mut tracker = RunTracker::new(run_id);
        let mut result = RunResult::new(run_id);

        info!(
            job = %job,
            run_id = %run_id,
            config = %config.short_fingerprint(),
            stateful = options.stateful,
            dry_run = options.dry_run,
            "Starting ingestion run"
        );

        match self
            .drive(job, config, source, options, &mut tracker, &mut result)
            .await
        {
            Ok(()) => {
                result.status = if tracker.phase() == RunPhase::Committed {
                    RunStatus::Committed
                } else {
                    RunStatus::Completed
                };
                info!(
                    job = %job,
                    run_id = %run_id,
                    stale = result.stale_count,
                    removed = result.removed.len(),
                    failed = result.failed_removals.len(),
                    "Run finished"
                );
            }
            Err(e) => {
                let phase = tracker.fail();
                let message = format!("{:#}", e);
                warn!(
                    job = %job,
                    run_id = %run_id,
                    phase = phase.as_str(),
                    pending = result.pending_count(),
                    error = %message,
                    "Run failed, checkpoint left unchanged"
                );
                result.errors.push(message);
                result.status = RunStatus::Failed { phase };
            }
        }

        result
    }

    async fn drive(
        &self,
        job: &JobIdentity,
        config: ConfigSnapshot,
        source: &dyn Source,
        options: RunOptions,
        tracker: &mut RunTracker,
        result: &mut RunResult,
    ) -> Result<()> {
        let run_id = tracker.run_id();
        let meta = SystemMetadata::observed_now(run_id.to_string());

        // RUNNING
        tracker.advance(RunPhase::Running)?;
        let mut state = source.empty_state();
        let snapshots = source
            .scan(&mut state)
            .await
            .with_context(|| format!("{} scan failed", source.source_type()))?;
        result.observed = state.len();

        if !options.dry_run {
            for snapshot in &snapshots {
                self.catalog
                    .ingest(snapshot, Some(&meta))
                    .await
                    .with_context(|| format!("Failed to emit {}", snapshot.urn))?;
                result.emitted += 1;
            }
        }

        if !options.stateful {
            return Ok(());
        }

        // STATE_BUILT
        tracker.advance(RunPhase::StateBuilt)?;
        let current = Checkpoint::new(job.clone(), run_id, config, state);
        let previous = self.load_previous(job).await?;

        // DIFFED
        tracker.advance(RunPhase::Diffed)?;
        let stale = self.stale_set(previous.as_ref(), &current, result)?;
        result.stale_count = stale.len();
        result.stale = stale.to_sorted_vec();

        if options.dry_run {
            return Ok(());
        }

        let mut pending = Vec::new();
        if self.policy.remove_stale_metadata && !stale.is_empty() {
            let previous_len = previous
                .as_ref()
                .map(|p| p.checkpoint.tracked_len())
                .unwrap_or(0);
            self.policy.check(&stale, previous_len)?;

            // RECONCILING
            tracker.advance(RunPhase::Reconciling)?;
            let outcome = Reconciler::new(self.catalog, meta)
                .reconcile(&stale)
                .await?;
            pending = outcome.failed_urns().cloned().collect();
            result.removed = outcome.succeeded;
            result.failed_removals = outcome.failed;
        }

        // COMMITTED
        let checkpoint = current.with_pending_removals(pending);
        let version = self
            .commit(&checkpoint, Expected::from_loaded(previous.as_ref()))
            .await?;
        tracker.advance(RunPhase::Committed)?;
        info!(job = %job, version, backend = self.store.backend(), "Checkpoint committed");

        Ok(())
    }

    /// Stale candidates of this run. A changed config or state kind resets
    /// the baseline: nothing is stale and earlier pending removals lapse.
    fn stale_set(
        &self,
        previous: Option<&StoredCheckpoint>,
        current: &Checkpoint,
        result: &mut RunResult,
    ) -> Result<StaleSet> {
        let Some(previous) = previous else {
            return Ok(StaleSet::default());
        };

        match stale_between(&previous.checkpoint, current) {
            Ok(mut stale) => {
                stale.extend_pending(previous.checkpoint.pending_removals(), current.state());
                Ok(stale)
            }
            Err(e @ (StateError::ConfigMismatch { .. } | StateError::IncompatibleStates { .. })) => {
                warn!(job = %current.job_id(), error = %e, "Skipping stale entity detection");
                result.errors.push(e.to_string());
                Ok(StaleSet::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_previous(&self, job: &JobIdentity) -> Result<Option<StoredCheckpoint>> {
        match self.with_retries("load checkpoint", || self.store.get(job)).await {
            Ok(stored) => Ok(Some(stored)),
            Err(StateError::NotFound(_)) => {
                info!(job = %job, "No previous checkpoint, first run");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to load previous checkpoint"),
        }
    }

    async fn commit(&self, checkpoint: &Checkpoint, expected: Expected) -> Result<u64> {
        let mut retried = false;
        let outcome = self
            .with_retries("commit checkpoint", || {
                let attempt = self.store.put(checkpoint, expected);
                let first = !retried;
                retried = true;
                async move {
                    match attempt.await {
                        // A timed-out attempt may have landed; recognise our own write.
                        Err(StateError::Conflict { .. }) if !first => {
                            match self.store.get(checkpoint.job_id()).await {
                                Ok(s) if s.checkpoint.run_id() == checkpoint.run_id() => {
                                    Ok(s.version)
                                }
                                _ => attempt_conflict(checkpoint, expected),
                            }
                        }
                        other => other,
                    }
                }
            })
            .await;
        outcome.context("Failed to commit checkpoint")
    }

    /// Run a store operation under the per-attempt timeout, retrying
    /// retryable failures with exponential backoff.
    async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StateError>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.store_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(StateError::Timeout(self.store_timeout)),
            };
            match outcome {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                    warn!(operation = what, attempt, error = %e, "Checkpoint store call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn attempt_conflict(checkpoint: &Checkpoint, expected: Expected) -> Result<u64, StateError> {
    Err(StateError::Conflict {
        job: checkpoint.job_id().clone(),
        expected: expected.describe(),
        found: "a newer checkpoint from another run".to_string(),
    })
}

/// Canonical config snapshot of a pipeline: its environment and source
/// settings. Stateful-ingestion knobs are excluded so that toggling
/// removal does not reset the baseline.
pub fn pipeline_snapshot(pipeline: &PipelineConfig) -> Result<ConfigSnapshot> {
    Ok(ConfigSnapshot::capture(&json!({
        "env": pipeline.env,
        "source": pipeline.source,
    }))?)
}

/// CLI entry point for `sti run <pipeline>`.
pub async fn run_pipeline(config: &Config, name: &str, dry_run: bool) -> Result<()> {
    let pipeline = config.pipeline(name)?;
    let si = &pipeline.stateful_ingestion;

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let catalog = backends::create_catalog(config, &pool)?;
    let store = backends::create_store(pipeline, catalog.clone(), &pool)?;
    let source = build_source(pipeline);
    let job = JobIdentity::new(source.source_type(), name, &si.task_name);

    let runner = JobRunner::new(store.as_ref(), catalog.as_ref(), si.policy())
        .with_store_limits(Duration::from_secs(si.store_timeout_secs), si.max_retries);
    let options = RunOptions {
        stateful: si.enabled,
        dry_run,
    };
    let result = runner
        .run_job(&job, pipeline_snapshot(pipeline)?, source.as_ref(), options)
        .await;

    print_report(name, &job, store.backend(), options, &result);
    pool.close().await;

    if let RunStatus::Failed { phase } = result.status {
        bail!(
            "run {} failed during {} ({} stale entities pending)",
            name,
            phase.as_str(),
            result.pending_count()
        );
    }
    Ok(())
}

fn print_report(
    name: &str,
    job: &JobIdentity,
    backend: &str,
    options: RunOptions,
    result: &RunResult,
) {
    if options.dry_run {
        println!("run {} (dry-run)", name);
    } else {
        println!("run {}", name);
    }
    println!("  job: {}", job);
    println!("  run_id: {}", result.run_id);
    println!("  observed: {}", result.observed);
    println!("  emitted: {}", result.emitted);

    if options.stateful {
        println!("  stale: {}", result.stale_count);
        for urn in &result.stale {
            println!("    - {}", urn);
        }
        println!("  removed: {}", result.removed.len());
        println!("  failed removals: {}", result.failed_removals.len());
        for f in &result.failed_removals {
            println!("    - {}: {}", f.urn, f.error);
        }
    }

    for e in &result.errors {
        println!("  warning: {}", e);
    }

    match result.status {
        RunStatus::Committed => println!("  checkpoint: committed ({})", backend),
        RunStatus::Completed => println!("  checkpoint: not written"),
        RunStatus::Failed { phase } => {
            println!("  checkpoint: unchanged (failed during {})", phase.as_str())
        }
    }
    if !result.is_failed() {
        println!("ok");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stateful_ingest_core::catalog::memory::InMemoryCatalog;
    use stateful_ingest_core::catalog::EntitySnapshot;
    use stateful_ingest_core::state::IngestionState;
    use stateful_ingest_core::store::memory::InMemoryCheckpointStore;
    use stateful_ingest_core::urn::Urn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Source returning whatever table list it currently holds.
    struct FakeSource {
        tables: Mutex<Vec<&'static str>>,
    }

    impl FakeSource {
        fn new(tables: &[&'static str]) -> Self {
            Self {
                tables: Mutex::new(tables.to_vec()),
            }
        }

        fn set(&self, tables: &[&'static str]) {
            *self.tables.lock().unwrap() = tables.to_vec();
        }
    }

    fn t(name: &str) -> Urn {
        Urn::dataset("mysql", &format!("datahub.stateful_ingestion_test_{}", name), "PROD")
    }

    #[async_trait]
    impl Source for FakeSource {
        fn source_type(&self) -> &str {
            "mysql"
        }
        fn description(&self) -> String {
            "fake".to_string()
        }
        fn empty_state(&self) -> IngestionState {
            IngestionState::sql()
        }
        fn is_healthy(&self) -> bool {
            true
        }
        async fn scan(&self, state: &mut IngestionState) -> anyhow::Result<Vec<EntitySnapshot>> {
            let tables = self.tables.lock().unwrap().clone();
            Ok(tables
                .into_iter()
                .map(|name| {
                    let urn = t(name);
                    state.add(urn.clone());
                    EntitySnapshot::new(urn).with_aspect("status", json!({"removed": false}))
                })
                .collect())
        }
    }

    fn job() -> JobIdentity {
        JobIdentity::new("mysql", "mysql_stateful_ingestion_smoke_test_pipeline", "stale_entity_removal")
    }

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot::from_value(json!({"host_port": "localhost:3306", "database": "datahub"}))
    }

    fn removing() -> StalePolicy {
        StalePolicy {
            remove_stale_metadata: true,
            ..StalePolicy::default()
        }
    }

    const STATEFUL: RunOptions = RunOptions {
        stateful: true,
        dry_run: false,
    };

    #[tokio::test]
    async fn dropped_table_is_soft_deleted() {
        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, removing());
        let source = FakeSource::new(&["t1", "t2"]);

        let first = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert_eq!(first.status, RunStatus::Committed);
        let cp1 = store.get(&job()).await.unwrap().checkpoint;

        source.set(&["t2"]);
        let second = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert_eq!(second.status, RunStatus::Committed);
        assert_eq!(second.stale, vec![t("t1")]);
        assert_eq!(second.removed, vec![t("t1")]);
        assert_eq!(catalog.removed_urns(), vec![t("t1")]);

        let stored = store.get(&job()).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.checkpoint.config(), cp1.config());
        assert_eq!(stored.checkpoint.run_id(), second.run_id);
    }

    #[tokio::test]
    async fn removal_is_opt_in() {
        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, StalePolicy::default());
        let source = FakeSource::new(&["t1", "t2"]);

        runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        source.set(&["t2"]);
        let result = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        assert!(result.is_committed());
        assert_eq!(result.stale_count, 1);
        assert!(result.removed.is_empty());
        assert!(catalog.removed_urns().is_empty());
    }

    #[tokio::test]
    async fn unreachable_catalog_during_reconcile_keeps_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, removing());
        let source = FakeSource::new(&["t1", "t2", "t3", "t4"]);
        runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        let before = store.get(&job()).await.unwrap();

        // Emission goes through; the outage starts before removal.
        struct OutageAfterEmit<'a>(&'a InMemoryCatalog);
        #[async_trait]
        impl<'a> Catalog for OutageAfterEmit<'a> {
            async fn ingest(
                &self,
                e: &EntitySnapshot,
                m: Option<&SystemMetadata>,
            ) -> Result<(), stateful_ingest_core::CatalogError> {
                self.0.ingest(e, m).await
            }
            async fn get(
                &self,
                urn: &Urn,
            ) -> Result<Option<stateful_ingest_core::EntityRecord>, stateful_ingest_core::CatalogError>
            {
                self.0.get(urn).await
            }
            async fn soft_delete(
                &self,
                _urn: &Urn,
                _m: Option<&SystemMetadata>,
            ) -> Result<(), stateful_ingest_core::CatalogError> {
                self.0.set_reachable(false);
                Err(stateful_ingest_core::CatalogError::Unreachable("connection reset".into()))
            }
            async fn health_check(&self) -> Result<(), stateful_ingest_core::CatalogError> {
                self.0.health_check().await
            }
        }

        let flaky = OutageAfterEmit(&catalog);
        let runner = JobRunner::new(&store, &flaky, removing());
        source.set(&["t2", "t3", "t4"]);
        let result = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        assert_eq!(
            result.status,
            RunStatus::Failed {
                phase: RunPhase::Reconciling
            }
        );
        assert_eq!(result.pending_count(), 1);
        assert_eq!(store.get(&job()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn empty_scan_trips_fail_safe() {
        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, removing());
        let source = FakeSource::new(&["t1", "t2"]);
        runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        source.set(&[]);
        let result = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        assert_eq!(
            result.status,
            RunStatus::Failed {
                phase: RunPhase::Diffed
            }
        );
        assert!(result.errors[0].contains("fail-safe"));
        assert!(catalog.removed_urns().is_empty());
        assert_eq!(store.get(&job()).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn failed_removals_are_retried_next_run() {
        struct RejectOnce<'a> {
            inner: &'a InMemoryCatalog,
            rejected: AtomicBool,
        }
        #[async_trait]
        impl<'a> Catalog for RejectOnce<'a> {
            async fn ingest(
                &self,
                e: &EntitySnapshot,
                m: Option<&SystemMetadata>,
            ) -> Result<(), stateful_ingest_core::CatalogError> {
                self.inner.ingest(e, m).await
            }
            async fn get(
                &self,
                urn: &Urn,
            ) -> Result<Option<stateful_ingest_core::EntityRecord>, stateful_ingest_core::CatalogError>
            {
                self.inner.get(urn).await
            }
            async fn soft_delete(
                &self,
                urn: &Urn,
                m: Option<&SystemMetadata>,
            ) -> Result<(), stateful_ingest_core::CatalogError> {
                if *urn == t("t3") && !self.rejected.swap(true, Ordering::SeqCst) {
                    return Err(stateful_ingest_core::CatalogError::Rejected {
                        status: 503,
                        message: "busy".into(),
                    });
                }
                self.inner.soft_delete(urn, m).await
            }
            async fn health_check(&self) -> Result<(), stateful_ingest_core::CatalogError> {
                Ok(())
            }
        }

        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let flaky = RejectOnce {
            inner: &catalog,
            rejected: AtomicBool::new(false),
        };
        let runner = JobRunner::new(&store, &flaky, removing());
        let source = FakeSource::new(&["t1", "t2", "t3", "t4", "t5"]);
        runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        source.set(&["t2", "t4", "t5"]);
        let second = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert!(second.is_committed());
        assert_eq!(second.removed, vec![t("t1")]);
        assert_eq!(second.failed_removals.len(), 1);
        let pending = store.get(&job()).await.unwrap().checkpoint.pending_removals().clone();
        assert!(pending.contains(&t("t3")));

        let third = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert!(third.is_committed());
        assert_eq!(third.removed, vec![t("t3")]);
        assert!(store
            .get(&job())
            .await
            .unwrap()
            .checkpoint
            .pending_removals()
            .is_empty());
        assert_eq!(catalog.removed_urns(), vec![t("t1"), t("t3")]);
    }

    #[tokio::test]
    async fn pending_removals_do_not_wedge_the_fail_safe() {
        /// Rejects every removal while `rejecting` is set; reachable throughout.
        struct RejectWhile<'a> {
            inner: &'a InMemoryCatalog,
            rejecting: AtomicBool,
        }
        #[async_trait]
        impl<'a> Catalog for RejectWhile<'a> {
            async fn ingest(
                &self,
                e: &EntitySnapshot,
                m: Option<&SystemMetadata>,
            ) -> Result<(), stateful_ingest_core::CatalogError> {
                self.inner.ingest(e, m).await
            }
            async fn get(
                &self,
                urn: &Urn,
            ) -> Result<Option<stateful_ingest_core::EntityRecord>, stateful_ingest_core::CatalogError>
            {
                self.inner.get(urn).await
            }
            async fn soft_delete(
                &self,
                urn: &Urn,
                m: Option<&SystemMetadata>,
            ) -> Result<(), stateful_ingest_core::CatalogError> {
                if self.rejecting.load(Ordering::SeqCst) {
                    return Err(stateful_ingest_core::CatalogError::Rejected {
                        status: 503,
                        message: "busy".into(),
                    });
                }
                self.inner.soft_delete(urn, m).await
            }
            async fn health_check(&self) -> Result<(), stateful_ingest_core::CatalogError> {
                Ok(())
            }
        }

        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let flaky = RejectWhile {
            inner: &catalog,
            rejecting: AtomicBool::new(true),
        };
        let runner = JobRunner::new(&store, &flaky, removing());
        let source = FakeSource::new(&["t1", "t2", "t3", "t4"]);
        runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        source.set(&["t1"]);
        let second = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert!(second.is_committed());
        assert_eq!(second.failed_removals.len(), 3);

        // Catalog recovers: 3 pending of 4 tracked is within 75%.
        flaky.rejecting.store(false, Ordering::SeqCst);
        let third = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert!(third.is_committed(), "errors: {:?}", third.errors);
        assert_eq!(third.removed, vec![t("t2"), t("t3"), t("t4")]);
        assert!(store
            .get(&job())
            .await
            .unwrap()
            .checkpoint
            .pending_removals()
            .is_empty());

        let fourth = runner.run_job(&job(), snapshot(), &source, STATEFUL).await;
        assert!(fourth.is_committed());
        assert_eq!(fourth.stale_count, 0);
    }

    #[tokio::test]
    async fn config_change_skips_detection_but_commits() {
        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, removing());
        let source = FakeSource::new(&["t1", "t2"]);
        runner.run_job(&job(), snapshot(), &source, STATEFUL).await;

        source.set(&["t2"]);
        let changed = ConfigSnapshot::from_value(json!({"host_port": "db2:3306"}));
        let result = runner.run_job(&job(), changed.clone(), &source, STATEFUL).await;

        assert!(result.is_committed());
        assert_eq!(result.stale_count, 0);
        assert!(catalog.removed_urns().is_empty());
        assert_eq!(store.get(&job()).await.unwrap().checkpoint.config(), &changed);
    }

    #[tokio::test]
    async fn dry_run_and_stateless_write_nothing() {
        let store = InMemoryCheckpointStore::new();
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, removing());
        let source = FakeSource::new(&["t1"]);

        let dry = runner
            .run_job(
                &job(),
                snapshot(),
                &source,
                RunOptions {
                    stateful: true,
                    dry_run: true,
                },
            )
            .await;
        assert_eq!(dry.status, RunStatus::Completed);
        assert_eq!(dry.emitted, 0);
        assert!(catalog.records().is_empty());

        let stateless = runner
            .run_job(&job(), snapshot(), &source, RunOptions::default())
            .await;
        assert_eq!(stateless.status, RunStatus::Completed);
        assert_eq!(stateless.emitted, 1);
        assert!(store.get(&job()).await.is_err());
    }

    #[tokio::test]
    async fn store_timeouts_are_retried_then_fail() {
        struct SlowStore;
        #[async_trait]
        impl CheckpointStore for SlowStore {
            async fn get(&self, _job: &JobIdentity) -> stateful_ingest_core::Result<StoredCheckpoint> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(StateError::Backend("unreachable".into()))
            }
            async fn put(&self, _c: &Checkpoint, _e: Expected) -> stateful_ingest_core::Result<u64> {
                Ok(1)
            }
            fn backend(&self) -> &'static str {
                "slow"
            }
        }

        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&SlowStore, &catalog, removing())
            .with_store_limits(Duration::from_millis(20), 2)
            .with_backoff(Duration::from_millis(1));
        let result = runner
            .run_job(&job(), snapshot(), &FakeSource::new(&["t1"]), STATEFUL)
            .await;

        assert_eq!(
            result.status,
            RunStatus::Failed {
                phase: RunPhase::StateBuilt
            }
        );
        assert!(result.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn concurrent_commit_is_detected() {
        /// Another writer commits between our load and our put.
        struct RacingStore {
            inner: InMemoryCheckpointStore,
        }
        #[async_trait]
        impl CheckpointStore for RacingStore {
            async fn get(&self, job: &JobIdentity) -> stateful_ingest_core::Result<StoredCheckpoint> {
                self.inner.get(job).await
            }
            async fn put(&self, c: &Checkpoint, e: Expected) -> stateful_ingest_core::Result<u64> {
                let rival = Checkpoint::new(
                    c.job_id().clone(),
                    Uuid::new_v4(),
                    c.config().clone(),
                    c.state().clone(),
                );
                self.inner.put(&rival, Expected::Any).await?;
                self.inner.put(c, e).await
            }
            fn backend(&self) -> &'static str {
                "racing"
            }
        }

        let store = RacingStore {
            inner: InMemoryCheckpointStore::new(),
        };
        let catalog = InMemoryCatalog::new();
        let runner = JobRunner::new(&store, &catalog, removing());

        let result = runner
            .run_job(&job(), snapshot(), &FakeSource::new(&["t1"]), STATEFUL)
            .await;

        assert!(result.is_failed());
        assert!(result.errors[0].contains("changed concurrently"));
        let stored = store.inner.get(&job()).await.unwrap();
        assert_ne!(stored.checkpoint.run_id(), result.run_id);
        assert_eq!(stored.version, 1);
    }
}
