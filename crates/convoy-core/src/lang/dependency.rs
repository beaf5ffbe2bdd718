//! Dependencies: a user's request to consume a contract.

use serde::{Deserialize, Serialize};

use super::{LabelSet, Metadata};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// ID of the requesting user
    pub user: String,

    /// `contract` or `namespace/contract`
    pub contract: String,

    /// Labels layered on top of the user's own labels
    #[serde(default, skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,
}

impl Dependency {
    /// Stable key used in the dependency map of a resolution.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}
