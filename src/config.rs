//! Configuration parsing and validation.
//!
//! The `sti` binary reads one TOML file (default `./config/sti.toml`):
//!
//! ```toml
//! [db]
//! path = "./data/sti.sqlite"
//!
//! [catalog]
//! # server = "http://127.0.0.1:8080"   # omit to use the local SQLite catalog
//! timeout_secs = 30
//! max_retries = 3
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [pipelines.warehouse]
//! env = "PROD"
//!
//! [pipelines.warehouse.source]
//! type = "sqlite"
//! path = "./data/warehouse.sqlite"
//! database = "datahub"
//!
//! [pipelines.warehouse.stateful_ingestion]
//! enabled = true
//! remove_stale_metadata = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use stateful_ingest_core::StalePolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where entities are published and stale ones removed.
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Base URL of a remote catalog. `None` uses the local SQLite catalog.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            server: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

/// One ingestion pipeline: a source plus its stateful-ingestion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_env")]
    pub env: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub stateful_ingestion: StatefulIngestionConfig,
}

fn default_env() -> String {
    "PROD".to_string()
}

/// Source settings, tagged by `type`.
///
/// Serializable so that it can be captured into a checkpoint's config
/// snapshot; two runs only diff against each other when it is unchanged.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Sqlite(SqliteSourceConfig),
    Filesystem(FilesystemSourceConfig),
}

impl SourceConfig {
    pub fn source_type(&self) -> &'static str {
        match self {
            SourceConfig::Sqlite(_) => "sqlite",
            SourceConfig::Filesystem(_) => "filesystem",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SqliteSourceConfig {
    pub path: PathBuf,
    /// Database name used in dataset URNs. Defaults to the file stem.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_true")]
    pub include_views: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatefulIngestionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub remove_stale_metadata: bool,
    #[serde(default = "default_fail_safe_threshold")]
    pub fail_safe_threshold: f64,
    /// `"sqlite"` (checkpoints in the local database) or `"catalog"`
    /// (checkpoints as an aspect on the job's catalog entity).
    #[serde(default = "default_state_provider")]
    pub state_provider: String,
    #[serde(default = "default_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_task_name")]
    pub task_name: String,
}

impl Default for StatefulIngestionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remove_stale_metadata: false,
            fail_safe_threshold: default_fail_safe_threshold(),
            state_provider: default_state_provider(),
            store_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            task_name: default_task_name(),
        }
    }
}

impl StatefulIngestionConfig {
    pub fn policy(&self) -> StalePolicy {
        StalePolicy {
            remove_stale_metadata: self.remove_stale_metadata,
            fail_safe_threshold: self.fail_safe_threshold,
        }
    }
}

fn default_fail_safe_threshold() -> f64 {
    StalePolicy::default().fail_safe_threshold
}
fn default_state_provider() -> String {
    "sqlite".to_string()
}
fn default_task_name() -> String {
    "stale_entity_removal".to_string()
}

impl Config {
    pub fn pipeline(&self, name: &str) -> Result<&PipelineConfig> {
        self.pipelines.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
            anyhow::anyhow!(
                "Unknown pipeline: '{}'. Configured: {}",
                name,
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Characters that delimit parts of job identities and data-job URNs.
const RESERVED_CHARS: &[char] = &['/', ',', '(', ')'];

fn check_identifier(field: &str, value: &str) -> Result<()> {
    if let Some(c) = value.chars().find(|c| RESERVED_CHARS.contains(c)) {
        anyhow::bail!("{} must not contain '{}': '{}'", field, c, value);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.catalog.timeout_secs == 0 {
        anyhow::bail!("catalog.timeout_secs must be > 0");
    }

    for (name, pipeline) in &config.pipelines {
        if name.trim().is_empty() {
            anyhow::bail!("pipeline names must not be empty");
        }
        if pipeline.env.trim().is_empty() {
            anyhow::bail!("pipelines.{}.env must not be empty", name);
        }
        check_identifier("pipeline name", name)?;
        check_identifier(&format!("pipelines.{}.env", name), &pipeline.env)?;

        let si = &pipeline.stateful_ingestion;
        if !(0.0..=100.0).contains(&si.fail_safe_threshold) {
            anyhow::bail!(
                "pipelines.{}.stateful_ingestion.fail_safe_threshold must be in [0, 100]",
                name
            );
        }
        if si.store_timeout_secs == 0 {
            anyhow::bail!(
                "pipelines.{}.stateful_ingestion.store_timeout_secs must be > 0",
                name
            );
        }
        if si.task_name.trim().is_empty() {
            anyhow::bail!("pipelines.{}.stateful_ingestion.task_name must not be empty", name);
        }
        check_identifier(
            &format!("pipelines.{}.stateful_ingestion.task_name", name),
            &si.task_name,
        )?;
        match si.state_provider.as_str() {
            "sqlite" | "catalog" => {}
            other => anyhow::bail!(
                "Unknown state provider for pipeline '{}': '{}'. Must be sqlite or catalog.",
                name,
                other
            ),
        }
        if si.remove_stale_metadata && !si.enabled {
            tracing::warn!(
                pipeline = %name,
                "remove_stale_metadata has no effect while stateful ingestion is disabled"
            );
        }
    }

    Ok(())
}
