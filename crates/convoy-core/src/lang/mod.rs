//! Policy language: the declarative objects operators write.
//!
//! Every object lives in a namespace. References between objects are either
//! a bare `name` (same namespace as the referring object) or `namespace/name`.
//! Clusters and ACL rules always live in the [`SYSTEM_NAMESPACE`].

pub mod acl;
pub mod cluster;
pub mod contract;
pub mod criteria;
pub mod dependency;
pub mod labels;
pub mod parser;
pub mod policy;
pub mod rule;
pub mod service;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub use acl::{AclRule, AclRuleActions, PolicyView, Privileges, Role};
pub use cluster::{Cluster, ClusterType};
pub use contract::{Allocation, Context, Contract};
pub use criteria::Criteria;
pub use dependency::Dependency;
pub use labels::{LabelOperations, LabelSet};
pub use parser::{parse_policy_file, parse_policy_str};
pub use policy::{Policy, PolicyNamespace};
pub use rule::{Rule, RuleActions};
pub use service::{Code, CodeType, Service, ServiceComponent};

/// Namespace holding clusters and ACL rules.
pub const SYSTEM_NAMESPACE: &str = "system";

/// Namespace assumed when an object omits one.
pub const DEFAULT_NAMESPACE: &str = "main";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Identity shared by all policy objects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Kind of a policy object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Service,
    Contract,
    Cluster,
    Rule,
    AclRule,
    Dependency,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Service => "service",
            Kind::Contract => "contract",
            Kind::Cluster => "cluster",
            Kind::Rule => "rule",
            Kind::AclRule => "acl-rule",
            Kind::Dependency => "dependency",
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        const ALL: [Kind; 6] = [
            Kind::Service,
            Kind::Contract,
            Kind::Cluster,
            Kind::Rule,
            Kind::AclRule,
            Kind::Dependency,
        ];
        ALL.into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown object kind '{}'", s)))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified reference to a policy object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub kind: Kind,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, kind: Kind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }
}

/// Parses `namespace/kind/name`.
impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(kind), Some(name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(ObjectKey::new(namespace, kind.parse()?, name))
            }
            _ => Err(Error::validation(format!(
                "invalid object key '{}', expected namespace/kind/name",
                s
            ))),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Any object that can be added to a [`Policy`].
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyObject {
    Service(Service),
    Contract(Contract),
    Cluster(Cluster),
    Rule(Rule),
    AclRule(AclRule),
    Dependency(Dependency),
}

impl PolicyObject {
    pub fn metadata(&self) -> &Metadata {
        match self {
            PolicyObject::Service(obj) => &obj.metadata,
            PolicyObject::Contract(obj) => &obj.metadata,
            PolicyObject::Cluster(obj) => &obj.metadata,
            PolicyObject::Rule(obj) => &obj.metadata,
            PolicyObject::AclRule(obj) => &obj.metadata,
            PolicyObject::Dependency(obj) => &obj.metadata,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            PolicyObject::Service(_) => Kind::Service,
            PolicyObject::Contract(_) => Kind::Contract,
            PolicyObject::Cluster(_) => Kind::Cluster,
            PolicyObject::Rule(_) => Kind::Rule,
            PolicyObject::AclRule(_) => Kind::AclRule,
            PolicyObject::Dependency(_) => Kind::Dependency,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let metadata = self.metadata();
        ObjectKey::new(&metadata.namespace, self.kind(), &metadata.name)
    }
}

/// Split a `name` or `namespace/name` reference.
pub fn split_reference<'a>(reference: &'a str, current_namespace: &'a str) -> (&'a str, &'a str) {
    match reference.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => (current_namespace, reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_from_str() {
        let key: ObjectKey = "system/acl-rule/admins".parse().unwrap();
        assert_eq!(key, ObjectKey::new("system", Kind::AclRule, "admins"));
        assert_eq!(key.to_string(), "system/acl-rule/admins");
        assert!("main/widget/x".parse::<ObjectKey>().is_err());
        assert!("main/service".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("kafka", "main"), ("main", "kafka"));
        assert_eq!(split_reference("platform/kafka", "main"), ("platform", "kafka"));
    }

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("main", Kind::AclRule, "admins");
        assert_eq!(key.to_string(), "main/acl-rule/admins");
    }

    #[test]
    fn test_metadata_default_namespace() {
        let metadata: Metadata = toml::from_str(r#"name = "kafka""#).unwrap();
        assert_eq!(metadata.namespace, DEFAULT_NAMESPACE);
    }
}
