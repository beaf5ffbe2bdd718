//! The resolved component graph.
//!
//! Each instance carries a checksum over its cluster, code type, rendered
//! params and the checksums of what it depends on. Labels are left out: a
//! change that only touches labels produces no update unless it also changes
//! a rendered param.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::ComponentInstanceKey;
use crate::lang::{CodeType, LabelSet};

/// Code bound to an instance, with parameters already rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCode {
    #[serde(rename = "type")]
    pub code_type: CodeType,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// One node of the resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInstance {
    pub key: ComponentInstanceKey,
    pub cluster: String,
    pub namespace: String,
    pub contract: String,
    pub context: String,
    #[serde(default)]
    pub allocation_keys: Vec<String>,
    pub service: String,
    pub component: String,

    /// Labels at the point the instance was first resolved
    #[serde(default)]
    pub labels: LabelSet,

    /// `None` for a service root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ResolvedCode>,

    /// Instances that must exist before this one
    #[serde(default)]
    pub depends_on: BTreeSet<ComponentInstanceKey>,

    /// Instances that depend on this one
    #[serde(default)]
    pub dependents: BTreeSet<ComponentInstanceKey>,

    /// Dependency keys whose resolution reaches this instance
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Hash of own configuration and of everything it depends on
    #[serde(default)]
    pub checksum: String,
}

impl ComponentInstance {
    pub fn is_code(&self) -> bool {
        self.code.is_some()
    }
}

/// Output of one resolve pass.
///
/// Immutable once [`PolicyResolution::finalize`] has run; the apply engine
/// mutates a copy of the actual state through a state updater.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResolution {
    #[serde(default)]
    pub instances: BTreeMap<ComponentInstanceKey, ComponentInstance>,

    /// Dependency key -> root instance it resolved to
    #[serde(default)]
    pub dependencies: BTreeMap<String, ComponentInstanceKey>,
}

impl PolicyResolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ComponentInstanceKey) -> Option<&ComponentInstance> {
        self.instances.get(key)
    }

    pub fn contains(&self, key: &ComponentInstanceKey) -> bool {
        self.instances.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub(crate) fn insert(&mut self, instance: ComponentInstance) {
        self.instances.insert(instance.key.clone(), instance);
    }

    /// Record that `from` depends on `to`.
    pub(crate) fn add_edge(&mut self, from: &ComponentInstanceKey, to: &ComponentInstanceKey) {
        if let Some(instance) = self.instances.get_mut(from) {
            instance.depends_on.insert(to.clone());
        }
        if let Some(instance) = self.instances.get_mut(to) {
            instance.dependents.insert(from.clone());
        }
    }

    /// Mark `key` and everything it depends on as used by a dependency.
    pub(crate) fn add_dependency(&mut self, key: &ComponentInstanceKey, dependency: &str) {
        let mut queue = VecDeque::from([key.clone()]);
        while let Some(current) = queue.pop_front() {
            let Some(instance) = self.instances.get_mut(&current) else {
                continue;
            };
            if instance.dependencies.insert(dependency.to_string()) {
                queue.extend(instance.depends_on.iter().cloned());
            }
        }
    }

    /// Keys ordered so that every instance follows what it depends on.
    ///
    /// Unrelated instances are ordered by key.
    pub fn topological_order(&self) -> Vec<ComponentInstanceKey> {
        let mut pending: BTreeMap<&ComponentInstanceKey, usize> = self
            .instances
            .values()
            .map(|i| {
                let known = i.depends_on.iter().filter(|d| self.contains(d)).count();
                (&i.key, known)
            })
            .collect();

        let mut ready: BTreeSet<&ComponentInstanceKey> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order = Vec::with_capacity(self.instances.len());

        while let Some(key) = ready.pop_first() {
            pending.remove(key);
            order.push(key.clone());
            let Some(instance) = self.instances.get(key) else {
                continue;
            };
            for dependent in &instance.dependents {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        // Only reachable on a cyclic graph; keep output total and stable.
        order.extend(pending.into_keys().cloned());
        order
    }

    /// Compute checksums bottom-up.
    pub fn finalize(&mut self) {
        for key in self.topological_order() {
            let checksum = match self.instances.get(&key) {
                Some(instance) => self.compute_checksum(instance),
                None => continue,
            };
            if let Some(instance) = self.instances.get_mut(&key) {
                instance.checksum = checksum;
            }
        }
    }

    /// `blake3(cluster || 0x00 || code || 0x00 || checksums of depends_on)`
    fn compute_checksum(&self, instance: &ComponentInstance) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(instance.cluster.as_bytes());
        hasher.update(&[0x00]);
        if let Some(code) = &instance.code {
            hasher.update(code.code_type.as_str().as_bytes());
            for (name, value) in &code.params {
                hasher.update(&[0x01]);
                hasher.update(name.as_bytes());
                hasher.update(&[0x02]);
                hasher.update(value.as_bytes());
            }
        }
        hasher.update(&[0x00]);
        for dep in &instance.depends_on {
            hasher.update(dep.as_str().as_bytes());
            hasher.update(&[0x02]);
            if let Some(other) = self.instances.get(dep) {
                hasher.update(other.checksum.as_bytes());
            }
            hasher.update(&[0x01]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Clusters referenced by any instance.
    pub fn clusters(&self) -> BTreeSet<&str> {
        self.instances.values().map(|i| i.cluster.as_str()).collect()
    }
}
