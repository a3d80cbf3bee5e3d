//! Entity retrieval by URN.
//!
//! Used by the `sti entity get` CLI command; reads from whichever catalog
//! the configuration selects (remote server or local SQLite catalog).

use anyhow::{bail, Result};

use stateful_ingest_core::catalog::EntityRecord;
use stateful_ingest_core::urn::Urn;

use crate::backends;
use crate::config::Config;
use crate::db;
use crate::migrate;

pub async fn get_entity(config: &Config, urn: &str) -> Result<EntityRecord> {
    let urn = Urn::new(urn)?;
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let catalog = backends::create_catalog(config, &pool)?;
    let record = catalog.get(&urn).await;
    pool.close().await;

    match record? {
        Some(r) => Ok(r),
        None => bail!("entity not found: {}", urn),
    }
}

/// CLI entry point: prints the entity record as pretty JSON.
pub async fn run_get(config: &Config, urn: &str) -> Result<()> {
    let record = get_entity(config, urn).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
