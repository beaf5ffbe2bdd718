//! Plugin contracts the apply engine relies on.
//!
//! A cluster plugin exists per [`ClusterType`], a code plugin per
//! `(ClusterType, CodeType)` pair, and any number of post-process plugins
//! run once per touched cluster at the end of an apply pass. Plugins are
//! collaborators and report failures with `anyhow`.

pub mod noop;
pub mod registry;

use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;

use crate::lang::{Cluster, ClusterType, CodeType};
use crate::resolve::{ComponentInstance, PolicyResolution};

pub use noop::{NoopClusterPlugin, NoopCodePlugin};
pub use registry::PluginRegistry;

/// Cluster-level operations.
pub trait ClusterPlugin: Send + Sync + fmt::Debug {
    fn cluster_type(&self) -> ClusterType;

    /// Check a cluster definition before it is used.
    fn validate(&self, cluster: &Cluster) -> Result<()>;

    /// Called once per touched cluster after all component actions ran.
    fn post_process(&self, _cluster: &Cluster) -> Result<()> {
        Ok(())
    }
}

/// Deploys one kind of code onto one kind of cluster.
pub trait CodePlugin: Send + Sync + fmt::Debug {
    fn cluster_type(&self) -> ClusterType;

    fn code_type(&self) -> CodeType;

    fn create(&self, cluster: &Cluster, instance: &ComponentInstance) -> Result<()>;

    fn update(&self, cluster: &Cluster, instance: &ComponentInstance) -> Result<()>;

    fn destroy(&self, cluster: &Cluster, instance: &ComponentInstance) -> Result<()>;

    /// Named endpoints exposed by a deployed instance.
    fn endpoints(
        &self,
        cluster: &Cluster,
        instance: &ComponentInstance,
    ) -> Result<BTreeMap<String, String>>;
}

/// Finalizes batched changes on a cluster.
pub trait PostProcessPlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn post_process(&self, cluster: &Cluster, state: &PolicyResolution) -> Result<()>;
}
