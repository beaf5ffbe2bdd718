//! Reconciliation actions produced by the diff engine.

mod cluster;
mod component;
mod dependency;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::StateUpdater;
use crate::error::Error;
use crate::event::EventLog;
use crate::external::ExternalData;
use crate::lang::{Cluster, Policy};
use crate::plugin::PluginRegistry;
use crate::resolve::PolicyResolution;
use crate::types::Generation;

pub use cluster::ClustersPostProcess;
pub use component::{ComponentCreate, ComponentDelete, ComponentUpdate};
pub use dependency::{DependencyAttach, DependencyDetach};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    ComponentCreate,
    ComponentUpdate,
    ComponentDelete,
    DependencyAttach,
    DependencyDetach,
    ClustersPostProcess,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ComponentCreate => "component-create",
            ActionKind::ComponentUpdate => "component-update",
            ActionKind::ComponentDelete => "component-delete",
            ActionKind::DependencyAttach => "dependency-attach",
            ActionKind::DependencyDetach => "dependency-detach",
            ActionKind::ClustersPostProcess => "clusters-post-process",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an action may read or mutate while it runs.
pub struct ActionContext<'a> {
    pub desired_policy: &'a Policy,
    pub desired_state: &'a PolicyResolution,
    pub actual_policy: &'a Policy,
    pub external: &'a ExternalData,
    pub plugins: &'a PluginRegistry,
    pub state: &'a mut dyn StateUpdater,
    pub event_log: &'a mut EventLog,
}

impl<'a> ActionContext<'a> {
    /// Find a cluster definition, preferring the desired policy.
    ///
    /// Instances being destroyed may reference clusters that only exist in
    /// the policy they were created from.
    pub fn cluster(&self, name: &str) -> Result<&'a Cluster> {
        self.desired_policy
            .cluster(name)
            .or_else(|| self.actual_policy.cluster(name))
            .ok_or_else(|| {
                Error::ClusterNotFound {
                    cluster: name.to_string(),
                }
                .into()
            })
    }
}

/// A single unit of reconciliation work.
pub trait Action: Send + fmt::Debug {
    fn kind(&self) -> ActionKind;

    /// Human-readable name used in logs and API responses.
    fn name(&self) -> String;

    /// Revision the action was planned for.
    fn revision(&self) -> Generation;

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()>;
}
