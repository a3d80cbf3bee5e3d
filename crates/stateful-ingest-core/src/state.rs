//! Ingestion state: what one run observed.
//!
//! An [`IngestionState`] is a pure in-memory accumulator. Sources call
//! [`add`](IngestionState::add) (and the variant-specific helpers) while
//! they scan; the finished state is wrapped into a
//! [`Checkpoint`](crate::checkpoint::Checkpoint) at the end of the run.
//!
//! All sets are `BTreeSet`s: duplicates collapse, membership is O(log n),
//! and iteration is in URN order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::urn::Urn;

/// Snapshot of everything a source observed in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestionState {
    /// SQL database sources: tables and views, plus the schemas scanned.
    Sql(SqlState),
    /// Directory-tree sources: files, plus the roots scanned.
    FileTree(FileTreeState),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlState {
    #[serde(default)]
    pub tables: BTreeSet<Urn>,
    #[serde(default)]
    pub views: BTreeSet<Urn>,
    #[serde(default)]
    pub scanned_schemas: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeState {
    #[serde(default)]
    pub files: BTreeSet<Urn>,
    #[serde(default)]
    pub roots: BTreeSet<String>,
}

impl IngestionState {
    pub fn sql() -> Self {
        IngestionState::Sql(SqlState::default())
    }

    pub fn file_tree() -> Self {
        IngestionState::FileTree(FileTreeState::default())
    }

    /// Variant name, as written in the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionState::Sql(_) => "sql",
            IngestionState::FileTree(_) => "file_tree",
        }
    }

    /// An empty state of the same variant.
    pub fn empty_like(&self) -> Self {
        match self {
            IngestionState::Sql(_) => Self::sql(),
            IngestionState::FileTree(_) => Self::file_tree(),
        }
    }

    /// Record an observed entity in the primary set (tables / files).
    ///
    /// Idempotent: adding the same URN twice leaves the state unchanged.
    pub fn add(&mut self, urn: Urn) {
        match self {
            IngestionState::Sql(s) => {
                s.tables.insert(urn);
            }
            IngestionState::FileTree(s) => {
                s.files.insert(urn);
            }
        }
    }

    /// Record an observed view. Views only exist for SQL states; on other
    /// variants the URN lands in the primary set.
    pub fn add_view(&mut self, urn: Urn) {
        match self {
            IngestionState::Sql(s) => {
                s.views.insert(urn);
            }
            other => other.add(urn),
        }
    }

    /// Record a schema the SQL scan covered. No-op for other variants.
    pub fn add_scanned_schema(&mut self, schema: impl Into<String>) {
        if let IngestionState::Sql(s) = self {
            s.scanned_schemas.insert(schema.into());
        }
    }

    /// Record a root the directory scan covered. No-op for other variants.
    pub fn add_root(&mut self, root: impl Into<String>) {
        if let IngestionState::FileTree(s) = self {
            s.roots.insert(root.into());
        }
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        match self {
            IngestionState::Sql(s) => s.tables.contains(urn) || s.views.contains(urn),
            IngestionState::FileTree(s) => s.files.contains(urn),
        }
    }

    /// Every observed URN across all categories, deduplicated, in URN order.
    pub fn entities(&self) -> BTreeSet<&Urn> {
        match self {
            IngestionState::Sql(s) => s.tables.iter().chain(s.views.iter()).collect(),
            IngestionState::FileTree(s) => s.files.iter().collect(),
        }
    }

    pub(crate) fn categories(&self) -> Vec<&BTreeSet<Urn>> {
        match self {
            IngestionState::Sql(s) => vec![&s.tables, &s.views],
            IngestionState::FileTree(s) => vec![&s.files],
        }
    }

    pub fn len(&self) -> usize {
        self.entities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories().iter().all(|c| c.is_empty())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
