//! Clusters that code components get deployed to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{LabelSet, Metadata};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Selects the cluster plugin
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,

    #[serde(default, skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,

    /// Plugin-specific settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// Supported cluster types. Unknown types fail at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Kubernetes,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
