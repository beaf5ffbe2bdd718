//! Error types for the resolve, diff and apply pipeline.
//!
//! Errors fall into two groups:
//! - **Dependency scoped**: caused by one dependency's labels or composition
//!   (expressions, templates, context matching, cycles, rule rejection). The
//!   resolver records them in the event log and moves on to the next dependency.
//! - **Pass fatal**: malformed policy, store or external data failures, and
//!   the aggregate apply failure. These are surfaced to the caller.

use crate::lang::Criteria;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Expression failed to parse or evaluate
    #[error("invalid expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// Template failed to parse or evaluate
    #[error("invalid template '{template}': {message}")]
    Template { template: String, message: String },

    /// Criteria expression could not be evaluated
    #[error("can't evaluate '{group}' in criteria, expression '{expression}': {message}")]
    CriteriaEvaluation {
        group: &'static str,
        expression: String,
        criteria: Box<Criteria>,
        message: String,
    },

    /// None of the contract's contexts matched the labels
    #[error("no context matched in contract '{contract}'")]
    NoMatchingContext { contract: String },

    /// Service composition loops back onto an instance being resolved
    #[error("cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    /// A global rule vetoed the dependency
    #[error("dependency rejected by rule '{rule}'")]
    RejectedByRule { rule: String },

    #[error("user '{id}' not found")]
    UserNotFound { id: String },

    #[error("cluster '{cluster}' not found")]
    ClusterNotFound { cluster: String },

    #[error(
        "no cluster for service '{service}': set 'cluster' on the service or provide a 'cluster' label"
    )]
    MissingCluster { service: String },

    /// Structurally invalid policy
    #[error("policy validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("user '{user}' is not allowed to manage {object}")]
    AccessDenied { user: String, object: String },

    #[error("no plugin registered for {0}")]
    PluginNotFound(String),

    /// Action returned an error
    #[error("error while applying action '{action}': {message}")]
    ActionFailed { action: String, message: String },

    /// Action terminated abnormally; the panic payload and trace are kept
    #[error("action '{action}' panicked: {message}")]
    ActionPanicked {
        action: String,
        message: String,
        backtrace: String,
    },

    /// One or more actions failed during an apply run
    #[error("{failed} of {total} actions failed while applying changes")]
    ApplyFailed { failed: usize, total: usize },

    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    #[error("external data error: {0:#}")]
    External(anyhow::Error),
}

impl Error {
    /// Whether the error is attributable to a single dependency.
    ///
    /// Dependency-scoped errors leave that dependency unresolved but never
    /// abort the whole resolution pass.
    pub fn is_dependency_scoped(&self) -> bool {
        matches!(
            self,
            Error::Expression { .. }
                | Error::Template { .. }
                | Error::CriteriaEvaluation { .. }
                | Error::NoMatchingContext { .. }
                | Error::CyclicDependency { .. }
                | Error::RejectedByRule { .. }
                | Error::UserNotFound { .. }
                | Error::ClusterNotFound { .. }
                | Error::MissingCluster { .. }
        )
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(vec![message.into()])
    }
}
