//! In-memory [`Catalog`] implementation for tests.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`. The catalog can be taken
//! offline with [`InMemoryCatalog::set_reachable`] to simulate an outage.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::urn::Urn;

use super::{removal_snapshot, Catalog, EntityRecord, EntitySnapshot, SystemMetadata};

/// In-memory catalog for testing.
pub struct InMemoryCatalog {
    entities: RwLock<BTreeMap<Urn, EntityRecord>>,
    reachable: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Snapshot of every stored record, in URN order.
    pub fn records(&self) -> Vec<EntityRecord> {
        self.entities.read().unwrap().values().cloned().collect()
    }

    /// URNs whose `status` aspect marks them removed.
    pub fn removed_urns(&self) -> Vec<Urn> {
        self.entities
            .read()
            .unwrap()
            .values()
            .filter(|r| r.entity.is_removed())
            .map(|r| r.entity.urn.clone())
            .collect()
    }

    fn ensure_reachable(&self) -> Result<(), CatalogError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CatalogError::Unreachable("in-memory catalog offline".to_string()))
        }
    }

    fn upsert(&self, entity: &EntitySnapshot, meta: Option<&SystemMetadata>) {
        let mut entities = self.entities.write().unwrap();
        entities
            .entry(entity.urn.clone())
            .or_insert_with(|| EntityRecord::new(EntitySnapshot::new(entity.urn.clone()), None))
            .merge(entity, meta);
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn ingest(
        &self,
        entity: &EntitySnapshot,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        self.ensure_reachable()?;
        self.upsert(entity, meta);
        Ok(())
    }

    async fn get(&self, urn: &Urn) -> Result<Option<EntityRecord>, CatalogError> {
        self.ensure_reachable()?;
        Ok(self.entities.read().unwrap().get(urn).cloned())
    }

    async fn soft_delete(
        &self,
        urn: &Urn,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        self.ensure_reachable()?;
        self.upsert(&removal_snapshot(urn), meta);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CatalogError> {
        self.ensure_reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn urn() -> Urn {
        Urn::dataset("sqlite", "main.orders", "PROD")
    }

    #[tokio::test]
    async fn ingest_merges_aspects() {
        let catalog = InMemoryCatalog::new();
        catalog
            .ingest(
                &EntitySnapshot::new(urn()).with_aspect("schema", json!({"fields": 2})),
                None,
            )
            .await
            .unwrap();
        catalog
            .ingest(
                &EntitySnapshot::new(urn()).with_aspect("status", json!({"removed": false})),
                Some(&SystemMetadata::observed_now("run-1")),
            )
            .await
            .unwrap();

        let record = catalog.get(&urn()).await.unwrap().unwrap();
        assert_eq!(record.entity.aspects.len(), 2);
        assert_eq!(
            record.system_metadata.unwrap().run_id.as_deref(),
            Some("run-1")
        );
    }

    #[tokio::test]
    async fn blank_system_metadata_keeps_existing() {
        let catalog = InMemoryCatalog::new();
        let meta = SystemMetadata {
            last_observed: Some(1628097379571),
            run_id: Some("af0fe6e4-f547-11eb-81b2-acde48001122".into()),
        };
        catalog
            .ingest(&EntitySnapshot::new(urn()), Some(&meta))
            .await
            .unwrap();
        catalog
            .ingest(&EntitySnapshot::new(urn()), Some(&SystemMetadata::default()))
            .await
            .unwrap();
        catalog.ingest(&EntitySnapshot::new(urn()), None).await.unwrap();

        let record = catalog.get(&urn()).await.unwrap().unwrap();
        assert_eq!(record.system_metadata, Some(meta));
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent_and_keeps_aspects() {
        let catalog = InMemoryCatalog::new();
        catalog
            .ingest(
                &EntitySnapshot::new(urn()).with_aspect("schema", json!({"fields": 2})),
                None,
            )
            .await
            .unwrap();
        catalog.soft_delete(&urn(), None).await.unwrap();
        catalog.soft_delete(&urn(), None).await.unwrap();

        let record = catalog.get(&urn()).await.unwrap().unwrap();
        assert!(record.entity.is_removed());
        assert!(record.entity.aspects.contains_key("schema"));
        assert_eq!(catalog.removed_urns(), vec![urn()]);
    }

    #[tokio::test]
    async fn offline_catalog_reports_unreachable() {
        let catalog = InMemoryCatalog::new();
        catalog.set_reachable(false);
        let err = catalog.health_check().await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(catalog.soft_delete(&urn(), None).await.is_err());
    }
}
