//! Structural validation of a policy.
//!
//! Validation runs before a policy update is accepted. All problems are
//! collected and reported together as [`Error::Validation`].

use std::collections::HashSet;

use super::{Criteria, LabelOperations, Policy, Role, Service};
use crate::error::{Error, Result};
use crate::eval::{Expression, Template};

const MAX_IDENTIFIER_LEN: usize = 100;

/// Lowercase letters, digits, `-` and `_`, starting with a letter or digit.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        let mut v = Validator::default();

        for (ns_name, ns) in &self.namespaces {
            v.identifier("namespace", ns_name);

            for (name, contract) in &ns.contracts {
                let what = format!("contract '{}/{}'", ns_name, name);
                v.identifier(&what, &contract.metadata.name);
                v.label_ops(&what, &contract.change_labels);
                if contract.contexts.is_empty() {
                    v.error(format!("{}: must have at least one context", what));
                }
                let mut seen = HashSet::new();
                for context in &contract.contexts {
                    let what = format!("{} context '{}'", what, context.name);
                    v.identifier(&what, &context.name);
                    if !seen.insert(context.name.as_str()) {
                        v.error(format!("{}: duplicate context name", what));
                    }
                    v.criteria(&what, context.criteria.as_ref());
                    v.label_ops(&what, &context.change_labels);
                    if self.find_service(&context.allocation.service, ns_name).is_none() {
                        v.error(format!(
                            "{}: allocation refers to unknown service '{}'",
                            what, context.allocation.service
                        ));
                    }
                    for key in &context.allocation.keys {
                        v.template(&what, key);
                    }
                }
            }

            for (name, service) in &ns.services {
                let what = format!("service '{}/{}'", ns_name, name);
                v.identifier(&what, &service.metadata.name);
                v.label_ops(&what, &service.change_labels);
                if let Some(cluster) = &service.cluster
                    && self.cluster(cluster).is_none()
                {
                    v.error(format!("{}: unknown cluster '{}'", what, cluster));
                }
                self.validate_components(&mut v, &what, ns_name, service);
            }

            for (name, cluster) in &ns.clusters {
                v.identifier(&format!("cluster '{}'", name), &cluster.metadata.name);
            }

            for (name, rule) in &ns.rules {
                let what = format!("rule '{}/{}'", ns_name, name);
                v.identifier(&what, &rule.metadata.name);
                v.criteria(&what, rule.criteria.as_ref());
                v.label_ops(&what, &rule.actions.change_labels);
            }

            for (name, rule) in &ns.acl_rules {
                let what = format!("acl rule '{}'", name);
                v.identifier(&what, &rule.metadata.name);
                v.criteria(&what, rule.criteria.as_ref());
                for role in rule.actions.add_role.keys() {
                    if let Err(err) = role.parse::<Role>() {
                        v.error(format!("{}: {}", what, err));
                    }
                }
            }

            for (name, dependency) in &ns.dependencies {
                let what = format!("dependency '{}/{}'", ns_name, name);
                v.identifier(&what, &dependency.metadata.name);
                if dependency.user.trim().is_empty() {
                    v.error(format!("{}: user is required", what));
                }
                if self.find_contract(&dependency.contract, ns_name).is_none() {
                    v.error(format!(
                        "{}: unknown contract '{}'",
                        what, dependency.contract
                    ));
                }
            }
        }

        v.finish()
    }

    fn validate_components(&self, v: &mut Validator, what: &str, ns_name: &str, service: &Service) {
        let mut seen = HashSet::new();
        for component in &service.components {
            let what = format!("{} component '{}'", what, component.name);
            v.identifier(&what, &component.name);
            if !seen.insert(component.name.as_str()) {
                v.error(format!("{}: duplicate component name", what));
            }

            match (&component.contract, &component.code) {
                (Some(contract), None) => {
                    if self.find_contract(contract, ns_name).is_none() {
                        v.error(format!("{}: unknown contract '{}'", what, contract));
                    }
                }
                (None, Some(code)) => {
                    for param in code.params.values() {
                        v.template(&what, param);
                    }
                }
                _ => v.error(format!(
                    "{}: exactly one of 'contract' or 'code' must be set",
                    what
                )),
            }

            for dep in &component.dependencies {
                if dep == &component.name {
                    v.error(format!("{}: depends on itself", what));
                }
            }
        }

        if let Err(err) = service.components_in_order() {
            v.error(format!("{}: {}", what, flatten(err)));
        }
    }
}

fn flatten(err: Error) -> String {
    match err {
        Error::Validation(messages) => messages.join("; "),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Validator {
    errors: Vec<String>,
}

impl Validator {
    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn identifier(&mut self, what: &str, name: &str) {
        if !is_identifier(name) {
            self.error(format!("{}: '{}' is not a valid identifier", what, name));
        }
    }

    fn criteria(&mut self, what: &str, criteria: Option<&Criteria>) {
        let Some(criteria) = criteria else {
            return;
        };
        for (group, expr) in criteria.expressions() {
            if let Err(err) = Expression::parse(expr) {
                self.error(format!("{} {}: {}", what, group, err));
            }
        }
    }

    fn template(&mut self, what: &str, text: &str) {
        if let Err(err) = Template::parse(text) {
            self.error(format!("{}: {}", what, err));
        }
    }

    fn label_ops(&mut self, what: &str, ops: &LabelOperations) {
        for name in ops.names() {
            if name.trim().is_empty() {
                self.error(format!("{}: empty label name in change-labels", what));
            }
        }
    }

    fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self.errors))
        }
    }
}
