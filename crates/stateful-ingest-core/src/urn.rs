//! Entity identifiers.
//!
//! A [`Urn`] is an opaque, globally unique string. Equality is exact string
//! comparison and ordering is lexicographic; that ordering is the canonical
//! order for every list rendering of a URN set (reports, stale candidates).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Identifier of one catalog entity, e.g.
/// `urn:li:dataset:(urn:li:dataPlatform:mysql,db.orders,PROD)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    /// Wrap a URN string. Rejects empty or whitespace-only input.
    pub fn new(value: impl Into<String>) -> Result<Self, StateError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(StateError::InvalidUrn(value));
        }
        Ok(Self(value))
    }

    /// Dataset URN: `urn:li:dataset:(urn:li:dataPlatform:{platform},{name},{env})`.
    pub fn dataset(platform: &str, name: &str, env: &str) -> Self {
        Self(format!(
            "urn:li:dataset:(urn:li:dataPlatform:{},{},{})",
            platform, name, env
        ))
    }

    /// Data-job URN, used as the anchor entity for catalog-stored checkpoints.
    pub fn data_job(orchestrator: &str, flow: &str, env: &str, job: &str) -> Self {
        Self(format!(
            "urn:li:dataJob:(urn:li:dataFlow:({},{},{}),{})",
            orchestrator, flow, env, job
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Entity type segment: `dataset` for `urn:li:dataset:(...)`.
    pub fn entity_type(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("urn:li:")?;
        rest.split(':').next().filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Urn {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Urn::new(s)
    }
}

impl TryFrom<String> for Urn {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Urn::new(value)
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.0
    }
}

impl AsRef<str> for Urn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
