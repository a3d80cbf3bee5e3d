//! Construction of the catalog and checkpoint store a command works against.
//!
//! | Setting | Value | Backend |
//! |---------|-------|---------|
//! | `[catalog].server` | unset | [`SqliteCatalog`] on the state database |
//! | `[catalog].server` | URL | [`HttpCatalog`] |
//! | `state_provider` | `"sqlite"` | [`SqliteCheckpointStore`] |
//! | `state_provider` | `"catalog"` | [`CatalogCheckpointStore`] on the selected catalog |

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use stateful_ingest_core::catalog::Catalog;
use stateful_ingest_core::store::catalog::CatalogCheckpointStore;
use stateful_ingest_core::store::CheckpointStore;

use crate::catalog_client::HttpCatalog;
use crate::config::{Config, PipelineConfig};
use crate::local_catalog::SqliteCatalog;
use crate::sqlite_store::SqliteCheckpointStore;

pub fn create_catalog(config: &Config, pool: &SqlitePool) -> Result<Arc<dyn Catalog>> {
    match &config.catalog.server {
        Some(server) => Ok(Arc::new(HttpCatalog::from_config(&config.catalog, server)?)),
        None => Ok(Arc::new(SqliteCatalog::new(pool.clone()))),
    }
}

pub fn create_store(
    pipeline: &PipelineConfig,
    catalog: Arc<dyn Catalog>,
    pool: &SqlitePool,
) -> Result<Box<dyn CheckpointStore>> {
    match pipeline.stateful_ingestion.state_provider.as_str() {
        "sqlite" => Ok(Box::new(SqliteCheckpointStore::new(pool.clone()))),
        "catalog" => Ok(Box::new(CatalogCheckpointStore::new(
            catalog,
            pipeline.env.clone(),
        ))),
        other => anyhow::bail!(
            "Unknown state provider: '{}'. Must be sqlite or catalog.",
            other
        ),
    }
}
