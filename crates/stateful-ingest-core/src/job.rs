//! Job identity: the key under which checkpoints are stored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of one ingestion job across runs.
///
/// Two runs are "the same job" exactly when all three parts match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    /// Source type, e.g. `"sqlite"` or `"filesystem"`.
    pub source_type: String,
    /// Pipeline name from the configuration.
    pub pipeline_name: String,
    /// Task within the pipeline, e.g. `"stale_entity_removal"`.
    pub task_name: String,
}

impl JobIdentity {
    pub fn new(
        source_type: impl Into<String>,
        pipeline_name: impl Into<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            pipeline_name: pipeline_name.into(),
            task_name: task_name.into(),
        }
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_type, self.pipeline_name, self.task_name
        )
    }
}
