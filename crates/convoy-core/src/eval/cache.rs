//! Optional memoization of compiled expressions and templates.
//!
//! Compilation only depends on the source text, so entries are keyed by text
//! and reused across parameter sets. Parse failures are memoized as well.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Expression, Params, Template};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct EvalCache {
    expressions: HashMap<String, std::result::Result<Arc<Expression>, String>>,
    templates: HashMap<String, std::result::Result<Arc<Template>, String>>,
}

impl EvalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expression(&mut self, text: &str) -> Result<Arc<Expression>> {
        let entry = self
            .expressions
            .entry(text.to_string())
            .or_insert_with(|| compile(text, Expression::parse));
        entry.clone().map_err(|message| Error::Expression {
            expression: text.to_string(),
            message,
        })
    }

    pub fn template(&mut self, text: &str) -> Result<Arc<Template>> {
        let entry = self
            .templates
            .entry(text.to_string())
            .or_insert_with(|| compile(text, Template::parse));
        entry.clone().map_err(|message| Error::Template {
            template: text.to_string(),
            message,
        })
    }

    pub fn len(&self) -> usize {
        self.expressions.len() + self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile<T>(
    text: &str,
    parse: impl FnOnce(&str) -> Result<T>,
) -> std::result::Result<Arc<T>, String> {
    parse(text).map(Arc::new).map_err(|err| match err {
        Error::Expression { message, .. } | Error::Template { message, .. } => message,
        other => other.to_string(),
    })
}

/// Evaluate a boolean expression, compiling through the cache when present.
pub fn evaluate_bool(text: &str, params: &Params, cache: Option<&mut EvalCache>) -> Result<bool> {
    match cache {
        Some(cache) => cache.expression(text)?.evaluate_bool(params),
        None => Expression::parse(text)?.evaluate_bool(params),
    }
}

/// Render a template, compiling through the cache when present.
pub fn render_template(
    text: &str,
    params: &Params,
    cache: Option<&mut EvalCache>,
) -> Result<String> {
    match cache {
        Some(cache) => cache.template(text)?.render(params),
        None => Template::parse(text)?.render(params),
    }
}
