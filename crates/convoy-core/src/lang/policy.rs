//! The policy: all objects, grouped by namespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    AclRule, Cluster, Contract, Dependency, Kind, ObjectKey, PolicyObject, Rule, SYSTEM_NAMESPACE,
    Service, split_reference,
};
use crate::error::{Error, Result};

/// Objects of one namespace, each kind keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyNamespace {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contracts: BTreeMap<String, Contract>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clusters: BTreeMap<String, Cluster>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rules: BTreeMap<String, Rule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub acl_rules: BTreeMap<String, AclRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Dependency>,
}

impl PolicyNamespace {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.contracts.is_empty()
            && self.clusters.is_empty()
            && self.rules.is_empty()
            && self.acl_rules.is_empty()
            && self.dependencies.is_empty()
    }
}

/// Full set of policy objects.
///
/// Mutated only through [`Policy::add_object`] / [`Policy::remove_object`];
/// callers run [`Policy::validate`] before persisting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub namespaces: BTreeMap<String, PolicyNamespace>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an object.
    pub fn add_object(&mut self, object: PolicyObject) -> Result<()> {
        let key = object.key();
        if matches!(key.kind, Kind::Cluster | Kind::AclRule) && key.namespace != SYSTEM_NAMESPACE {
            return Err(Error::validation(format!(
                "{} must be in namespace '{}'",
                key, SYSTEM_NAMESPACE
            )));
        }

        let ns = self.namespaces.entry(key.namespace).or_default();
        match object {
            PolicyObject::Service(obj) => {
                ns.services.insert(key.name, obj);
            }
            PolicyObject::Contract(obj) => {
                ns.contracts.insert(key.name, obj);
            }
            PolicyObject::Cluster(obj) => {
                ns.clusters.insert(key.name, obj);
            }
            PolicyObject::Rule(obj) => {
                ns.rules.insert(key.name, obj);
            }
            PolicyObject::AclRule(obj) => {
                ns.acl_rules.insert(key.name, obj);
            }
            PolicyObject::Dependency(obj) => {
                ns.dependencies.insert(key.name, obj);
            }
        }
        Ok(())
    }

    /// Remove an object; returns whether it existed.
    pub fn remove_object(&mut self, key: &ObjectKey) -> bool {
        let Some(ns) = self.namespaces.get_mut(&key.namespace) else {
            return false;
        };
        let removed = match key.kind {
            Kind::Service => ns.services.remove(&key.name).is_some(),
            Kind::Contract => ns.contracts.remove(&key.name).is_some(),
            Kind::Cluster => ns.clusters.remove(&key.name).is_some(),
            Kind::Rule => ns.rules.remove(&key.name).is_some(),
            Kind::AclRule => ns.acl_rules.remove(&key.name).is_some(),
            Kind::Dependency => ns.dependencies.remove(&key.name).is_some(),
        };
        if ns.is_empty() {
            self.namespaces.remove(&key.namespace);
        }
        removed
    }

    pub fn get_object(&self, key: &ObjectKey) -> Option<PolicyObject> {
        let ns = self.namespaces.get(&key.namespace)?;
        let name = &key.name;
        match key.kind {
            Kind::Service => ns.services.get(name).cloned().map(PolicyObject::Service),
            Kind::Contract => ns.contracts.get(name).cloned().map(PolicyObject::Contract),
            Kind::Cluster => ns.clusters.get(name).cloned().map(PolicyObject::Cluster),
            Kind::Rule => ns.rules.get(name).cloned().map(PolicyObject::Rule),
            Kind::AclRule => ns.acl_rules.get(name).cloned().map(PolicyObject::AclRule),
            Kind::Dependency => ns.dependencies.get(name).cloned().map(PolicyObject::Dependency),
        }
    }

    /// All objects, ordered by namespace then kind then name.
    pub fn objects(&self) -> Vec<PolicyObject> {
        let mut objects = Vec::new();
        for ns in self.namespaces.values() {
            objects.extend(ns.services.values().cloned().map(PolicyObject::Service));
            objects.extend(ns.contracts.values().cloned().map(PolicyObject::Contract));
            objects.extend(ns.clusters.values().cloned().map(PolicyObject::Cluster));
            objects.extend(ns.rules.values().cloned().map(PolicyObject::Rule));
            objects.extend(ns.acl_rules.values().cloned().map(PolicyObject::AclRule));
            objects.extend(ns.dependencies.values().cloned().map(PolicyObject::Dependency));
        }
        objects
    }

    pub fn object_count(&self) -> usize {
        self.namespaces
            .values()
            .map(|ns| {
                ns.services.len()
                    + ns.contracts.len()
                    + ns.clusters.len()
                    + ns.rules.len()
                    + ns.acl_rules.len()
                    + ns.dependencies.len()
            })
            .sum()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.namespaces.get(namespace)?.services.get(name)
    }

    pub fn contract(&self, namespace: &str, name: &str) -> Option<&Contract> {
        self.namespaces.get(namespace)?.contracts.get(name)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.namespaces.get(SYSTEM_NAMESPACE)?.clusters.get(name)
    }

    /// Resolve a `name` or `namespace/name` service reference.
    pub fn find_service(&self, reference: &str, current_namespace: &str) -> Option<&Service> {
        let (ns, name) = split_reference(reference, current_namespace);
        self.service(ns, name)
    }

    /// Resolve a `name` or `namespace/name` contract reference.
    pub fn find_contract(&self, reference: &str, current_namespace: &str) -> Option<&Contract> {
        let (ns, name) = split_reference(reference, current_namespace);
        self.contract(ns, name)
    }

    /// Every dependency, ordered by namespace then name.
    pub fn dependencies(&self) -> Vec<&Dependency> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.dependencies.values())
            .collect()
    }

    pub fn clusters(&self) -> Vec<&Cluster> {
        self.namespaces
            .get(SYSTEM_NAMESPACE)
            .map(|ns| ns.clusters.values().collect())
            .unwrap_or_default()
    }

    /// Rules visible from a namespace (its own plus system rules), by weight.
    pub fn rules_for(&self, namespace: &str) -> Vec<&Rule> {
        let mut visible = vec![SYSTEM_NAMESPACE];
        if namespace != SYSTEM_NAMESPACE {
            visible.push(namespace);
        }
        let mut rules: Vec<&Rule> = visible
            .into_iter()
            .filter_map(|ns| self.namespaces.get(ns))
            .flat_map(|ns| ns.rules.values())
            .collect();
        rules.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        rules
    }

    /// ACL rules, by weight.
    pub fn acl_rules(&self) -> Vec<&AclRule> {
        let mut rules: Vec<&AclRule> = self
            .namespaces
            .get(SYSTEM_NAMESPACE)
            .map(|ns| ns.acl_rules.values().collect())
            .unwrap_or_default();
        rules.sort_by(|a, b| {
            (a.weight, &a.metadata.name).cmp(&(b.weight, &b.metadata.name))
        });
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{ClusterType, LabelSet, Metadata};

    fn dependency(namespace: &str, name: &str) -> PolicyObject {
        PolicyObject::Dependency(Dependency {
            metadata: Metadata::new(namespace, name),
            user: "1".to_string(),
            contract: "kafka".to_string(),
            labels: LabelSet::new(),
        })
    }

    #[test]
    fn test_add_replace_remove() {
        let mut policy = Policy::new();
        policy.add_object(dependency("main", "b")).unwrap();
        policy.add_object(dependency("main", "a")).unwrap();
        policy.add_object(dependency("dev", "c")).unwrap();
        policy.add_object(dependency("main", "a")).unwrap();
        assert_eq!(policy.object_count(), 3);

        let names: Vec<_> = policy
            .dependencies()
            .iter()
            .map(|d| d.key())
            .collect();
        assert_eq!(names, vec!["dev/c", "main/a", "main/b"]);

        let key = ObjectKey::new("dev", Kind::Dependency, "c");
        assert!(policy.get_object(&key).is_some());
        assert!(policy.remove_object(&key));
        assert!(!policy.remove_object(&key));
        assert!(!policy.namespaces.contains_key("dev"));
    }

    #[test]
    fn test_cluster_must_live_in_system() {
        let mut policy = Policy::new();
        let cluster = Cluster {
            metadata: Metadata::new("main", "c1"),
            cluster_type: ClusterType::Kubernetes,
            labels: LabelSet::new(),
            config: Default::default(),
        };
        assert!(policy.add_object(PolicyObject::Cluster(cluster.clone())).is_err());

        let mut cluster = cluster;
        cluster.metadata.namespace = SYSTEM_NAMESPACE.to_string();
        policy.add_object(PolicyObject::Cluster(cluster)).unwrap();
        assert!(policy.cluster("c1").is_some());
    }

    #[test]
    fn test_rules_for_namespace_sorted_by_weight() {
        let mut policy = Policy::new();
        for (ns, name, weight) in [("system", "global", 50), ("main", "local", 10), ("other", "hidden", 1)] {
            policy
                .add_object(PolicyObject::Rule(Rule {
                    metadata: Metadata::new(ns, name),
                    weight,
                    criteria: None,
                    actions: Default::default(),
                }))
                .unwrap();
        }
        let names: Vec<_> = policy
            .rules_for("main")
            .iter()
            .map(|r| r.metadata.name.as_str())
            .collect();
        assert_eq!(names, vec!["local", "global"]);
        assert_eq!(policy.rules_for(SYSTEM_NAMESPACE).len(), 1);
    }
}
