//! Convoy Core Library
//!
//! Declarative orchestration: resolves service dependencies into a graph of
//! component instances, diffs it against what was last achieved and applies
//! the difference through cluster plugins.

pub mod apply;
pub mod config;
pub mod context;
pub mod diff;
pub mod enforcer;
pub mod error;
pub mod eval;
pub mod event;
pub mod external;
pub mod lang;
pub mod plugin;
pub mod resolve;
pub mod status;
pub mod store;
pub mod types;

pub use error::{Error, Result};

/// Re-exports of commonly used types
pub mod prelude {
    // Policy language
    pub use crate::lang::{
        Cluster, ClusterType, CodeType, Contract, Criteria, Dependency, LabelSet, Policy,
        PolicyObject, Rule, Service, parse_policy_file, parse_policy_str,
    };

    // Pipeline
    pub use crate::apply::{Action, ActionKind, ApplyOutcome, EngineApply};
    pub use crate::diff::{DiffSummary, diff};
    pub use crate::resolve::{
        ComponentInstance, ComponentInstanceKey, PolicyResolution, resolve_all_dependencies,
    };

    // Collaborators
    pub use crate::event::{EventLog, EventSink};
    pub use crate::external::{ExternalData, User};
    pub use crate::plugin::PluginRegistry;
    pub use crate::store::{LocalStore, Store};

    // Process wiring
    pub use crate::config::ServerConfig;
    pub use crate::context::AppContext;
    pub use crate::enforcer::{Enforcer, PolicyUpdateResult};
    pub use crate::status::{SystemStatus, collect_status};
    pub use crate::types::Generation;
}
