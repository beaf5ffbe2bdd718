//! Contracts and their ordered contexts.

use serde::{Deserialize, Serialize};

use super::{Criteria, LabelOperations, Metadata};
use crate::error::Result;
use crate::eval::{EvalCache, Params, render_template};

/// A reusable service interface; dependencies always target a contract.
///
/// Contexts are evaluated in declaration order and the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Label changes applied when the contract is selected
    #[serde(default, rename = "change-labels", skip_serializing_if = "LabelOperations::is_empty")]
    pub change_labels: LabelOperations,

    #[serde(default, rename = "context")]
    pub contexts: Vec<Context>,
}

/// One conditional implementation of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,

    /// No criteria means the context always matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    #[serde(default, rename = "change-labels", skip_serializing_if = "LabelOperations::is_empty")]
    pub change_labels: LabelOperations,

    pub allocation: Allocation,
}

/// Which service to instantiate and which keys distinguish its instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// `service` or `namespace/service`
    pub service: String,

    /// Templates rendered per dependency; distinct values yield distinct instances
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl Contract {
    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    /// First context whose criteria matches, in declaration order.
    pub fn find_matching_context(
        &self,
        params: &Params,
        mut cache: Option<&mut EvalCache>,
    ) -> Result<Option<&Context>> {
        for context in &self.contexts {
            if context.matches(params, cache.as_deref_mut())? {
                return Ok(Some(context));
            }
        }
        Ok(None)
    }
}

impl Context {
    pub fn matches(&self, params: &Params, cache: Option<&mut EvalCache>) -> Result<bool> {
        super::criteria::criteria_allows(self.criteria.as_ref(), params, cache)
    }

    /// Render allocation keys in declaration order, stopping at the first error.
    pub fn resolve_keys(
        &self,
        params: &Params,
        mut cache: Option<&mut EvalCache>,
    ) -> Result<Vec<String>> {
        self.allocation
            .keys
            .iter()
            .map(|key| render_template(key, params, cache.as_deref_mut()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Param;
    use crate::lang::LabelSet;

    fn contract() -> Contract {
        toml::from_str(
            r#"
            name = "kafka"

            [[context]]
            name = "prod"
            criteria = { require-all = ["prod == 'yes'"] }
            allocation = { service = "kafka", keys = ["{{.User.Labels.team}}", "fixed"] }

            [[context]]
            name = "fallback"
            allocation = { service = "kafka" }
            "#,
        )
        .unwrap()
    }

    fn params(labels: &[(&str, &str)]) -> Params {
        let labels = LabelSet::from_pairs(labels.iter().copied());
        let mut params = Params::with_labels(&labels);
        params.insert("User", Param::map().with("Labels", (&labels).into()));
        params
    }

    #[test]
    fn test_first_matching_context_wins() {
        let contract = contract();
        let prod = params(&[("prod", "yes"), ("team", "platform")]);
        let found = contract.find_matching_context(&prod, None).unwrap().unwrap();
        assert_eq!(found.name, "prod");

        let dev = params(&[("prod", "no")]);
        let found = contract.find_matching_context(&dev, None).unwrap().unwrap();
        assert_eq!(found.name, "fallback");
    }

    #[test]
    fn test_resolve_keys_in_order() {
        let contract = contract();
        let context = contract.context("prod").unwrap();
        let mut cache = EvalCache::new();
        let keys = context
            .resolve_keys(&params(&[("team", "platform")]), Some(&mut cache))
            .unwrap();
        assert_eq!(keys, vec!["platform", "fixed"]);
    }

    #[test]
    fn test_resolve_keys_fails_fast() {
        let contract = contract();
        let context = contract.context("prod").unwrap();
        assert!(context.resolve_keys(&params(&[]), None).is_err());
    }

    #[test]
    fn test_no_contexts_match() {
        let mut contract = contract();
        contract.contexts.truncate(1);
        assert!(
            contract
                .find_matching_context(&params(&[]), None)
                .unwrap()
                .is_none()
        );
    }
}
