//! Services and their components.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::{LabelOperations, Metadata};
use crate::error::{Error, Result};

/// A concrete implementation allocated by a contract context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Cluster every code component is deployed to. When absent, the
    /// `cluster` label decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(default, rename = "change-labels", skip_serializing_if = "LabelOperations::is_empty")]
    pub change_labels: LabelOperations,

    #[serde(default, rename = "component")]
    pub components: Vec<ServiceComponent>,
}

/// Either a nested contract or a piece of deployable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceComponent {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,

    /// Sibling components that must exist first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    #[serde(rename = "type")]
    pub code_type: CodeType,

    /// Parameter templates rendered per instance
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Supported code types. Unknown types fail at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    Helm,
    Raw,
}

impl CodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeType::Helm => "helm",
            CodeType::Raw => "raw",
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Service {
    pub fn component(&self, name: &str) -> Option<&ServiceComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Components ordered so that each one follows its sibling dependencies.
    ///
    /// Ties keep declaration order.
    pub fn components_in_order(&self) -> Result<Vec<&ServiceComponent>> {
        let mut ordered = Vec::with_capacity(self.components.len());
        let mut done = HashSet::new();
        let mut path = Vec::new();
        for component in &self.components {
            self.visit(component, &mut done, &mut path, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        component: &'a ServiceComponent,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        ordered: &mut Vec<&'a ServiceComponent>,
    ) -> Result<()> {
        if done.contains(component.name.as_str()) {
            return Ok(());
        }
        if path.contains(&component.name.as_str()) {
            let mut cycle: Vec<String> = path.iter().map(|s| s.to_string()).collect();
            cycle.push(component.name.clone());
            return Err(Error::CyclicDependency { path: cycle });
        }

        path.push(&component.name);
        for dep in &component.dependencies {
            let sibling = self.component(dep).ok_or_else(|| {
                Error::validation(format!(
                    "component '{}' of service '{}' depends on unknown component '{}'",
                    component.name, self.metadata.name, dep
                ))
            })?;
            self.visit(sibling, done, path, ordered)?;
        }
        path.pop();

        done.insert(&component.name);
        ordered.push(component);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(toml_src: &str) -> Service {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_components_follow_dependencies() {
        let svc = service(
            r#"
            name = "analytics"

            [[component]]
            name = "spark"
            code = { type = "helm", params = { retention = "{{.Labels.retention}}" } }
            dependencies = ["kafka", "hdfs"]

            [[component]]
            name = "kafka"
            contract = "kafka"

            [[component]]
            name = "hdfs"
            contract = "hdfs"
            "#,
        );

        let names: Vec<_> = svc
            .components_in_order()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["kafka", "hdfs", "spark"]);
    }

    #[test]
    fn test_component_cycle_detected() {
        let svc = service(
            r#"
            name = "loop"

            [[component]]
            name = "a"
            contract = "x"
            dependencies = ["b"]

            [[component]]
            name = "b"
            contract = "y"
            dependencies = ["a"]
            "#,
        );
        match svc.components_in_order() {
            Err(Error::CyclicDependency { path }) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code_type_rejected() {
        let result: std::result::Result<Service, _> = toml::from_str(
            r#"
            name = "bad"

            [[component]]
            name = "a"
            code = { type = "docker-compose" }
            "#,
        );
        assert!(result.is_err());
    }
}
