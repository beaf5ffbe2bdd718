//! Component instance identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the synthetic component representing a whole service instance.
pub const ROOT_COMPONENT: &str = "root";

const SEPARATOR: &str = "#";

/// Deterministic identity of one component instance.
///
/// Built from cluster, namespace, contract, context (plus its resolved
/// allocation keys), service and component. Identical inputs always yield
/// the identical key; the diff engine joins resolutions on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentInstanceKey(String);

impl ComponentInstanceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentInstanceKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Everything that identifies one allocated service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    pub cluster: String,
    pub namespace: String,
    pub contract: String,
    pub context: String,
    pub allocation_keys: Vec<String>,
    pub service: String,
}

impl KeyParts {
    /// Context name with allocation keys appended, e.g. `prod-analytics`.
    pub fn context_with_keys(&self) -> String {
        if self.allocation_keys.is_empty() {
            self.context.clone()
        } else {
            format!("{}-{}", self.context, self.allocation_keys.join("-"))
        }
    }

    pub fn root(&self) -> ComponentInstanceKey {
        self.component(ROOT_COMPONENT)
    }

    pub fn component(&self, component: &str) -> ComponentInstanceKey {
        let context = self.context_with_keys();
        let segments = [
            self.cluster.as_str(),
            self.namespace.as_str(),
            self.contract.as_str(),
            context.as_str(),
            self.service.as_str(),
            component,
        ];
        ComponentInstanceKey(segments.join(SEPARATOR))
    }
}
