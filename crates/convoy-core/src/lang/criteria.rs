//! Require-all / require-any / require-none criteria.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eval::{EvalCache, Params, evaluate_bool};

/// Boolean gate over labels.
///
/// - `require-all`: every expression must be true
/// - `require-none`: no expression may be true
/// - `require-any`: when non-empty, at least one expression must be true
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Criteria {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_all: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_any: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_none: Vec<String>,
}

impl Criteria {
    /// Whether the criteria evaluates to true for the given parameters.
    ///
    /// Any evaluation error aborts with [`Error::CriteriaEvaluation`] naming
    /// the offending expression; remaining groups are not evaluated.
    pub fn allows(&self, params: &Params, mut cache: Option<&mut EvalCache>) -> Result<bool> {
        for expr in &self.require_all {
            if !self.evaluate("require-all", expr, params, cache.as_deref_mut())? {
                return Ok(false);
            }
        }

        for expr in &self.require_none {
            if self.evaluate("require-none", expr, params, cache.as_deref_mut())? {
                return Ok(false);
            }
        }

        if self.require_any.is_empty() {
            return Ok(true);
        }
        for expr in &self.require_any {
            if self.evaluate("require-any", expr, params, cache.as_deref_mut())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All expressions in declaration order, tagged with their group.
    pub fn expressions(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let all = self.require_all.iter().map(|e| ("require-all", e.as_str()));
        let any = self.require_any.iter().map(|e| ("require-any", e.as_str()));
        let none = self.require_none.iter().map(|e| ("require-none", e.as_str()));
        all.chain(any).chain(none)
    }

    fn evaluate(
        &self,
        group: &'static str,
        expr: &str,
        params: &Params,
        cache: Option<&mut EvalCache>,
    ) -> Result<bool> {
        evaluate_bool(expr, params, cache).map_err(|err| Error::CriteriaEvaluation {
            group,
            expression: expr.to_string(),
            criteria: Box::new(self.clone()),
            message: err.to_string(),
        })
    }
}

/// Evaluate optional criteria; absence means "always matches".
pub fn criteria_allows(
    criteria: Option<&Criteria>,
    params: &Params,
    cache: Option<&mut EvalCache>,
) -> Result<bool> {
    match criteria {
        Some(criteria) => criteria.allows(params, cache),
        None => Ok(true),
    }
}
