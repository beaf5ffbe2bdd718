//! Policy documents: TOML files holding any number of policy objects.
//!
//! ```toml
//! [[contract]]
//! name = "kafka"
//!
//! [[contract.context]]
//! name = "prod"
//! criteria = { require-all = ["prod == 'yes'"] }
//! allocation = { service = "kafka", keys = ["{{.User.Labels.team}}"] }
//! ```

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::path::Path;

use super::{AclRule, Cluster, Contract, Dependency, PolicyObject, Rule, Service};
use crate::config::parser::enhance_toml_error;

#[derive(Debug, Default, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    service: Vec<Service>,
    #[serde(default)]
    contract: Vec<Contract>,
    #[serde(default)]
    cluster: Vec<Cluster>,
    #[serde(default)]
    rule: Vec<Rule>,
    #[serde(default)]
    acl_rule: Vec<AclRule>,
    #[serde(default)]
    dependency: Vec<Dependency>,
}

/// Parse a policy document from a file.
pub fn parse_policy_file(path: &Path) -> Result<Vec<PolicyObject>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;

    parse_policy_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))
}

/// Parse a policy document from a string.
pub fn parse_policy_str(content: &str) -> Result<Vec<PolicyObject>> {
    let doc: PolicyDocument =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

    let mut objects = Vec::new();
    objects.extend(doc.cluster.into_iter().map(PolicyObject::Cluster));
    objects.extend(doc.service.into_iter().map(PolicyObject::Service));
    objects.extend(doc.contract.into_iter().map(PolicyObject::Contract));
    objects.extend(doc.rule.into_iter().map(PolicyObject::Rule));
    objects.extend(doc.acl_rule.into_iter().map(PolicyObject::AclRule));
    objects.extend(doc.dependency.into_iter().map(PolicyObject::Dependency));
    Ok(objects)
}
