//! Stale-entity reconciler.
//!
//! Soft-deletes every stale candidate independently and reports an
//! aggregate [`ReconcileOutcome`]. One entity failing never stops the
//! others. The only fatal condition is a catalog that is unreachable as a
//! whole: a connectivity-class failure on one entity triggers a health
//! probe, and if the probe fails too the pass is abandoned with
//! [`StateError::Connectivity`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, SystemMetadata};
use crate::diff::StaleSet;
use crate::error::{CatalogError, Result, StateError};
use crate::urn::Urn;

/// A removal that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRemoval {
    pub urn: Urn,
    pub error: String,
}

/// Aggregate result of one reconciliation pass. Both lists are in URN order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub succeeded: Vec<Urn>,
    pub failed: Vec<FailedRemoval>,
}

impl ReconcileOutcome {
    pub fn failed_urns(&self) -> impl Iterator<Item = &Urn> {
        self.failed.iter().map(|f| &f.urn)
    }
}

/// Issues soft-delete instructions for stale entities.
pub struct Reconciler<'a> {
    catalog: &'a dyn Catalog,
    meta: SystemMetadata,
}

impl<'a> Reconciler<'a> {
    /// `meta` is attached to every removal (normally the current run's id).
    pub fn new(catalog: &'a dyn Catalog, meta: SystemMetadata) -> Self {
        Self { catalog, meta }
    }

    pub async fn reconcile(&self, stale: &StaleSet) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        for urn in stale.iter() {
            match self.catalog.soft_delete(urn, Some(&self.meta)).await {
                Ok(()) => outcome.succeeded.push(urn.clone()),
                Err(CatalogError::NotFound(_)) => {
                    debug!(urn = %urn, "Stale entity already absent from catalog");
                    outcome.succeeded.push(urn.clone());
                }
                Err(e) if e.is_connectivity() => {
                    if let Err(probe) = self.catalog.health_check().await {
                        warn!(
                            urn = %urn,
                            removed = outcome.succeeded.len(),
                            remaining = stale.len() - outcome.succeeded.len() - outcome.failed.len(),
                            error = %probe,
                            "Catalog unreachable, abandoning reconciliation"
                        );
                        return Err(StateError::Connectivity(probe.to_string()));
                    }
                    warn!(urn = %urn, error = %e, "Removal failed, catalog still reachable");
                    outcome.failed.push(FailedRemoval {
                        urn: urn.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(urn = %urn, error = %e, "Removal rejected");
                    outcome.failed.push(FailedRemoval {
                        urn: urn.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            removed = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Reconciled stale entities"
        );
        Ok(outcome)
    }
}
