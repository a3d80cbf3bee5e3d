//! Catalog abstraction: the metadata service stale removal talks to.
//!
//! The [`Catalog`] trait is the narrow slice of the metadata service's
//! entity API the core needs: upsert an entity snapshot, fetch one entity,
//! soft-delete one entity, and probe health. Implementations live next to
//! their transport (HTTP client, SQLite-backed local catalog); an in-memory
//! one is provided here for tests.
//!
//! Soft deletion sets the `status` aspect to `{"removed": true}`; it never
//! erases the entity, so re-running a removal is idempotent.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::CatalogError;
use crate::urn::Urn;

/// Aspect carrying the soft-delete flag.
pub const STATUS_ASPECT: &str = "status";

/// One entity as published by a source: its URN and named aspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub urn: Urn,
    #[serde(default)]
    pub aspects: Map<String, Value>,
}

impl EntitySnapshot {
    pub fn new(urn: Urn) -> Self {
        Self {
            urn,
            aspects: Map::new(),
        }
    }

    /// Builder-style aspect insertion.
    pub fn with_aspect(mut self, name: &str, value: Value) -> Self {
        self.aspects.insert(name.to_string(), value);
        self
    }

    /// Whether the `status` aspect marks the entity removed.
    pub fn is_removed(&self) -> bool {
        self.aspects
            .get(STATUS_ASPECT)
            .and_then(|s| s.get("removed"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Provenance attached to a write: when it was observed and by which run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetadata {
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl SystemMetadata {
    pub fn observed_now(run_id: impl Into<String>) -> Self {
        Self {
            last_observed: Some(chrono::Utc::now().timestamp_millis()),
            run_id: Some(run_id.into()),
        }
    }
}

/// Stored form of an entity; also the body of an ingest request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: EntitySnapshot,
    #[serde(
        rename = "systemMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system_metadata: Option<SystemMetadata>,
}

impl EntityRecord {
    pub fn new(entity: EntitySnapshot, system_metadata: Option<SystemMetadata>) -> Self {
        Self {
            entity,
            system_metadata,
        }
    }

    /// Upsert: incoming aspects overwrite same-named ones, others are kept.
    ///
    /// Blank system metadata (`{}`) does not erase what is already stored.
    pub fn merge(&mut self, incoming: &EntitySnapshot, meta: Option<&SystemMetadata>) {
        for (name, value) in &incoming.aspects {
            self.entity.aspects.insert(name.clone(), value.clone());
        }
        if let Some(meta) = meta.filter(|m| **m != SystemMetadata::default()) {
            self.system_metadata = Some(meta.clone());
        }
    }
}

/// The snapshot a soft delete upserts: only `status.removed = true`.
///
/// Merged into an existing record it keeps every other aspect; for an
/// entity the catalog never saw it creates a bare removed record.
pub fn removal_snapshot(urn: &Urn) -> EntitySnapshot {
    EntitySnapshot::new(urn.clone()).with_aspect(STATUS_ASPECT, json!({ "removed": true }))
}

/// The metadata service, as seen by the ingestion core.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Upsert an entity snapshot.
    async fn ingest(
        &self,
        entity: &EntitySnapshot,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError>;

    /// Fetch one entity; `None` when the catalog has never seen it.
    async fn get(&self, urn: &Urn) -> Result<Option<EntityRecord>, CatalogError>;

    /// Mark an entity removed. Idempotent.
    async fn soft_delete(&self, urn: &Urn, meta: Option<&SystemMetadata>)
        -> Result<(), CatalogError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<(), CatalogError>;
}
