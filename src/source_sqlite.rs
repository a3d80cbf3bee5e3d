//! SQLite database source.
//!
//! Reads `sqlite_master` for tables and views and publishes one dataset
//! per object:
//!
//! `urn:li:dataset:(urn:li:dataPlatform:sqlite,{database}.{name},{env})`
//!
//! Tables go into the state's `tables` set, views into `views`. Internal
//! `sqlite_*` tables are skipped. The database is opened read-only and is
//! never created.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;

use stateful_ingest_core::catalog::{EntitySnapshot, STATUS_ASPECT};
use stateful_ingest_core::state::IngestionState;
use stateful_ingest_core::urn::Urn;

use crate::config::SqliteSourceConfig;
use crate::sources::Source;

pub const PLATFORM: &str = "sqlite";

pub struct SqliteSource {
    config: SqliteSourceConfig,
    env: String,
}

impl SqliteSource {
    pub fn new(config: SqliteSourceConfig, env: &str) -> Self {
        Self {
            config,
            env: env.to_string(),
        }
    }

    /// Database name used in URNs: configured, else the file stem.
    pub fn database(&self) -> String {
        self.config.database.clone().unwrap_or_else(|| {
            self.config
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "main".to_string())
        })
    }

    pub fn urn_for(&self, name: &str) -> Urn {
        Urn::dataset(PLATFORM, &format!("{}.{}", self.database(), name), &self.env)
    }
}

#[async_trait]
impl Source for SqliteSource {
    fn source_type(&self) -> &str {
        PLATFORM
    }

    fn description(&self) -> String {
        format!(
            "tables{} of {}",
            if self.config.include_views { " and views" } else { "" },
            self.config.path.display()
        )
    }

    fn empty_state(&self) -> IngestionState {
        IngestionState::sql()
    }

    fn is_healthy(&self) -> bool {
        self.config.path.is_file()
    }

    async fn scan(&self, state: &mut IngestionState) -> Result<Vec<EntitySnapshot>> {
        let path = &self.config.path;
        if !path.is_file() {
            bail!("SQLite source database does not exist: {}", path.display());
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open source database: {}", path.display()))?;

        let objects = sqlx::query(
            "SELECT name, type FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name ASC",
        )
        .fetch_all(&pool)
        .await?;

        let database = self.database();
        state.add_scanned_schema(database.clone());

        let mut snapshots = Vec::with_capacity(objects.len());
        for row in objects {
            let name: String = row.get("name");
            let kind: String = row.get("type");
            let is_view = kind == "view";
            if is_view && !self.config.include_views {
                continue;
            }

            let columns = sqlx::query(&format!(
                "PRAGMA table_info(\"{}\")",
                name.replace('"', "\"\"")
            ))
            .fetch_all(&pool)
            .await?;
            let fields: Vec<_> = columns
                .iter()
                .map(|c| {
                    json!({
                        "fieldPath": c.get::<String, _>("name"),
                        "nativeDataType": c.get::<String, _>("type"),
                        "nullable": c.get::<i64, _>("notnull") == 0,
                    })
                })
                .collect();

            let urn = self.urn_for(&name);
            if is_view {
                state.add_view(urn.clone());
            } else {
                state.add(urn.clone());
            }

            snapshots.push(
                EntitySnapshot::new(urn)
                    .with_aspect(STATUS_ASPECT, json!({ "removed": false }))
                    .with_aspect(
                        "datasetProperties",
                        json!({
                            "name": name,
                            "qualifiedName": format!("{}.{}", database, name),
                            "customProperties": { "subType": kind },
                        }),
                    )
                    .with_aspect(
                        "schemaMetadata",
                        json!({ "schemaName": format!("{}.{}", database, name), "fields": fields }),
                    ),
            );
        }

        pool.close().await;
        snapshots.sort_by(|a, b| a.urn.cmp(&b.urn));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    async fn fixture(tmp: &TempDir) -> std::path::PathBuf {
        let path = tmp.path().join("warehouse.sqlite");
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .unwrap();
        for stmt in [
            "CREATE TABLE stateful_ingestion_test_t1 (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            "CREATE TABLE stateful_ingestion_test_t2 (id INTEGER PRIMARY KEY)",
            "CREATE VIEW t2_ids AS SELECT id FROM stateful_ingestion_test_t2",
        ] {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;
        path
    }

    fn source(path: std::path::PathBuf, include_views: bool) -> SqliteSource {
        SqliteSource::new(
            SqliteSourceConfig {
                path,
                database: Some("datahub".to_string()),
                include_views,
            },
            "PROD",
        )
    }

    #[tokio::test]
    async fn scans_tables_and_views() {
        let tmp = TempDir::new().unwrap();
        let src = source(fixture(&tmp).await, true);

        let mut state = src.empty_state();
        let snapshots = src.scan(&mut state).await.unwrap();

        assert_eq!(snapshots.len(), 3);
        assert_eq!(state.len(), 3);
        let t1 = src.urn_for("stateful_ingestion_test_t1");
        assert_eq!(
            t1.as_str(),
            "urn:li:dataset:(urn:li:dataPlatform:sqlite,datahub.stateful_ingestion_test_t1,PROD)"
        );
        assert!(state.contains(&t1));

        let IngestionState::Sql(sql) = &state else {
            panic!("expected sql state");
        };
        assert_eq!(sql.views.len(), 1);
        assert!(sql.scanned_schemas.contains("datahub"));

        let t1_snapshot = snapshots.iter().find(|s| s.urn == t1).unwrap();
        assert!(!t1_snapshot.is_removed());
        assert_eq!(t1_snapshot.aspects["schemaMetadata"]["fields"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn views_can_be_excluded() {
        let tmp = TempDir::new().unwrap();
        let src = source(fixture(&tmp).await, false);
        let mut state = src.empty_state();
        src.scan(&mut state).await.unwrap();
        assert_eq!(state.len(), 2);
    }

    #[tokio::test]
    async fn missing_database_fails_without_creating_it() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.sqlite");
        let src = source(path.clone(), true);
        assert!(!src.is_healthy());
        let mut state = src.empty_state();
        assert!(src.scan(&mut state).await.is_err());
        assert!(!path.exists());
    }
}
