use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use stateful_ingest_core::catalog::{EntitySnapshot, STATUS_ASPECT};
use stateful_ingest_core::state::IngestionState;
use stateful_ingest_core::urn::Urn;

use crate::config::FilesystemSourceConfig;
use crate::sources::Source;

pub const PLATFORM: &str = "file";

/// Publishes one dataset per file under a root directory.
pub struct FilesystemSource {
    config: FilesystemSourceConfig,
    env: String,
}

impl FilesystemSource {
    pub fn new(config: FilesystemSourceConfig, env: &str) -> Self {
        Self {
            config,
            env: env.to_string(),
        }
    }

    /// `urn:li:dataset:(urn:li:dataPlatform:file,{root}/{relative},{env})`
    pub fn urn_for(&self, relative_path: &str) -> Urn {
        let root = self.config.root.to_string_lossy();
        Urn::dataset(
            PLATFORM,
            &format!("{}/{}", root.trim_end_matches('/'), relative_path),
            &self.env,
        )
    }
}

#[async_trait]
impl Source for FilesystemSource {
    fn source_type(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> String {
        format!(
            "files matching {} under {}",
            self.config.include_globs.join(", "),
            self.config.root.display()
        )
    }

    fn empty_state(&self) -> IngestionState {
        IngestionState::file_tree()
    }

    fn is_healthy(&self) -> bool {
        self.config.root.is_dir()
    }

    async fn scan(&self, state: &mut IngestionState) -> Result<Vec<EntitySnapshot>> {
        let root = &self.config.root;
        if !root.exists() {
            bail!(
                "Filesystem source root does not exist: {}",
                root.display()
            );
        }

        let include_set = build_globset(&self.config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(self.config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        state.add_root(root.to_string_lossy().to_string());

        let mut snapshots = Vec::new();

        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            let urn = self.urn_for(&rel_str);
            state.add(urn.clone());
            snapshots.push(file_snapshot(urn, path, &rel_str)?);
        }

        snapshots.sort_by(|a, b| a.urn.cmp(&b.urn));

        Ok(snapshots)
    }
}

fn file_snapshot(urn: Urn, path: &Path, relative_path: &str) -> Result<EntitySnapshot> {
    let metadata = std::fs::metadata(path)?;
    let modified_secs = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let modified = Utc
        .timestamp_opt(modified_secs, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(std::fs::read(path)?);
    let content_hash = hex::encode(hasher.finalize());

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(EntitySnapshot::new(urn)
        .with_aspect(STATUS_ASPECT, json!({ "removed": false }))
        .with_aspect(
            "datasetProperties",
            json!({
                "name": name,
                "qualifiedName": relative_path,
                "externalUrl": format!("file://{}", path.display()),
                "customProperties": {
                    "size": metadata.len().to_string(),
                    "modified": modified,
                    "sha256": content_hash,
                },
            }),
        ))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
