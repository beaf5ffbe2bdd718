//! Global rules consulted after a context matches.

use serde::{Deserialize, Serialize};

use super::{Criteria, LabelOperations, Metadata};

/// Rules may rewrite labels or reject a dependency outright.
///
/// They are applied in ascending weight order; ties break on namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default)]
    pub weight: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    #[serde(default)]
    pub actions: RuleActions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default, rename = "change-labels", skip_serializing_if = "LabelOperations::is_empty")]
    pub change_labels: LabelOperations,

    #[serde(default)]
    pub reject: bool,
}

impl Rule {
    pub fn sort_key(&self) -> (i32, &str, &str) {
        (self.weight, &self.metadata.namespace, &self.metadata.name)
    }
}
