//! SQLite-backed [`Catalog`]: the local stand-in for a metadata service.
//!
//! Stores one row per entity in the `entities` table with its aspects and
//! last system metadata as JSON. Used directly by `sti run` when no remote
//! catalog is configured, and served over HTTP by `sti serve catalog`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use stateful_ingest_core::catalog::{
    removal_snapshot, Catalog, EntityRecord, EntitySnapshot, SystemMetadata,
};
use stateful_ingest_core::error::CatalogError;
use stateful_ingest_core::urn::Urn;

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load<'e, E>(executor: E, urn: &Urn) -> Result<Option<EntityRecord>, CatalogError>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let row = sqlx::query(
            "SELECT aspects_json, system_metadata_json FROM entities WHERE urn = ?",
        )
        .bind(urn.as_str())
        .fetch_optional(executor)
        .await
        .map_err(unreachable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let aspects_json: String = row.get("aspects_json");
        let meta_json: Option<String> = row.get("system_metadata_json");

        let aspects: Map<String, Value> = serde_json::from_str(&aspects_json)
            .map_err(|e| CatalogError::InvalidResponse(format!("{}: {}", urn, e)))?;
        let system_metadata = meta_json
            .map(|m| serde_json::from_str::<SystemMetadata>(&m))
            .transpose()
            .map_err(|e| CatalogError::InvalidResponse(format!("{}: {}", urn, e)))?;

        Ok(Some(EntityRecord::new(
            EntitySnapshot {
                urn: urn.clone(),
                aspects,
            },
            system_metadata,
        )))
    }

    async fn upsert(
        &self,
        entity: &EntitySnapshot,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await.map_err(unreachable)?;

        // Write first so the transaction holds the write lock before it reads;
        // concurrent upserts of one URN then merge one after another.
        sqlx::query("UPDATE entities SET updated_at = updated_at WHERE urn = ?")
            .bind(entity.urn.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unreachable)?;

        let mut record = Self::load(&mut *tx, &entity.urn)
            .await?
            .unwrap_or_else(|| EntityRecord::new(EntitySnapshot::new(entity.urn.clone()), None));
        record.merge(entity, meta);

        let aspects_json = serde_json::to_string(&record.entity.aspects)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        let meta_json = record
            .system_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO entities (urn, entity_type, aspects_json, system_metadata_json, removed, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(urn) DO UPDATE SET
                aspects_json = excluded.aspects_json,
                system_metadata_json = excluded.system_metadata_json,
                removed = excluded.removed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entity.urn.as_str())
        .bind(entity.urn.entity_type())
        .bind(&aspects_json)
        .bind(&meta_json)
        .bind(record.entity.is_removed())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(unreachable)?;

        tx.commit().await.map_err(unreachable)?;
        Ok(())
    }

    /// URNs of every entity, optionally only the soft-deleted ones.
    pub async fn list_urns(&self, removed_only: bool) -> Result<Vec<Urn>, CatalogError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT urn FROM entities WHERE (? = 0 OR removed = 1) ORDER BY urn ASC",
        )
        .bind(removed_only)
        .fetch_all(&self.pool)
        .await
        .map_err(unreachable)?;

        rows.into_iter()
            .map(|u| Urn::new(u).map_err(|e| CatalogError::InvalidResponse(e.to_string())))
            .collect()
    }
}

fn unreachable(e: sqlx::Error) -> CatalogError {
    CatalogError::Unreachable(e.to_string())
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn ingest(
        &self,
        entity: &EntitySnapshot,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        self.upsert(entity, meta).await
    }

    async fn get(&self, urn: &Urn) -> Result<Option<EntityRecord>, CatalogError> {
        Self::load(&self.pool, urn).await
    }

    async fn soft_delete(
        &self,
        urn: &Urn,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        self.upsert(&removal_snapshot(urn), meta).await
    }

    async fn health_check(&self) -> Result<(), CatalogError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unreachable)?;
        Ok(())
    }
}
