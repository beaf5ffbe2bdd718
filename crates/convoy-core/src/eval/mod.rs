//! Expression and template evaluation over label parameters.
//!
//! Two small languages are used by the policy:
//! - **Expressions** (criteria): `prod == 'yes' && priority > 100`
//! - **Templates** (allocation keys, code params): `{{ .User.Labels.team }}`
//!
//! Both evaluate against a [`Params`] tree. Compiled forms can be memoized in
//! an [`EvalCache`], which never changes results.

pub mod cache;
pub mod expression;
pub mod template;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::lang::LabelSet;

pub use cache::{EvalCache, evaluate_bool, render_template};
pub use expression::{Expression, Value};
pub use template::Template;

/// A single parameter: either a string value or a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Str(String),
    Map(BTreeMap<String, Param>),
}

impl Param {
    pub fn map() -> Self {
        Param::Map(BTreeMap::new())
    }

    /// Insert a child entry; a no-op on string params.
    pub fn with(mut self, name: impl Into<String>, value: Param) -> Self {
        if let Param::Map(ref mut entries) = self {
            entries.insert(name.into(), value);
        }
        self
    }

    pub fn with_str(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, Param::Str(value.into()))
    }
}

impl From<&LabelSet> for Param {
    fn from(labels: &LabelSet) -> Self {
        Param::Map(
            labels
                .iter()
                .map(|(k, v)| (k.clone(), Param::Str(v.clone())))
                .collect(),
        )
    }
}

/// Named parameters visible to an expression or template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Params {
    root: BTreeMap<String, Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose every label as a top-level string parameter.
    pub fn with_labels(labels: &LabelSet) -> Self {
        let mut params = Self::new();
        for (k, v) in labels.iter() {
            params.insert(k.clone(), Param::Str(v.clone()));
        }
        params
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Param) {
        self.root.insert(name.into(), value);
    }

    /// Look up a dotted path such as `service.name`.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Param> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(first.as_ref())?;
        for segment in rest {
            match current {
                Param::Map(entries) => current = entries.get(segment.as_ref())?,
                Param::Str(_) => return None,
            }
        }
        Some(current)
    }
}
