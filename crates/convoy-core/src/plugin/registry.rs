//! Plugin registry built once per pass from explicit registrations.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{ClusterPlugin, CodePlugin, NoopClusterPlugin, NoopCodePlugin, PostProcessPlugin};
use crate::error::{Error, Result};
use crate::lang::{ClusterType, CodeType, Policy};

/// Registry of available plugins.
///
/// Lookups are keyed by closed enums, so a miss means the type was never
/// registered; [`PluginRegistry::validate_policy`] reports such misses
/// before anything is applied.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    clusters: BTreeMap<ClusterType, Box<dyn ClusterPlugin>>,
    code: BTreeMap<(ClusterType, CodeType), Box<dyn CodePlugin>>,
    post_process: Vec<Box<dyn PostProcessPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry where every cluster and code type is handled by a
    /// no-op plugin that sleeps for `sleep` per call.
    pub fn with_noop_plugins(sleep: Duration) -> Self {
        let mut registry = Self::new();
        registry.register_cluster(Box::new(NoopClusterPlugin::new(ClusterType::Kubernetes)));
        for code_type in [CodeType::Helm, CodeType::Raw] {
            registry.register_code(Box::new(NoopCodePlugin::new(
                ClusterType::Kubernetes,
                code_type,
                sleep,
            )));
        }
        registry
    }

    /// Register a cluster plugin, replacing any plugin for the same type.
    pub fn register_cluster(&mut self, plugin: Box<dyn ClusterPlugin>) {
        self.clusters.insert(plugin.cluster_type(), plugin);
    }

    /// Register a code plugin, replacing any plugin for the same type pair.
    pub fn register_code(&mut self, plugin: Box<dyn CodePlugin>) {
        self.code
            .insert((plugin.cluster_type(), plugin.code_type()), plugin);
    }

    /// Register a post-process plugin. Post-processors run in registration order.
    pub fn register_post_process(&mut self, plugin: Box<dyn PostProcessPlugin>) {
        self.post_process.push(plugin);
    }

    /// Get the plugin for a cluster type.
    pub fn cluster_plugin(&self, cluster_type: ClusterType) -> Result<&dyn ClusterPlugin> {
        self.clusters
            .get(&cluster_type)
            .map(|p| p.as_ref())
            .ok_or_else(|| Error::PluginNotFound(format!("cluster type '{}'", cluster_type)))
    }

    /// Get the plugin for a code type on a cluster type.
    pub fn code_plugin(
        &self,
        cluster_type: ClusterType,
        code_type: CodeType,
    ) -> Result<&dyn CodePlugin> {
        self.code
            .get(&(cluster_type, code_type))
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                Error::PluginNotFound(format!(
                    "code type '{}' on cluster type '{}'",
                    code_type, cluster_type
                ))
            })
    }

    pub fn post_process_plugins(&self) -> &[Box<dyn PostProcessPlugin>] {
        &self.post_process
    }

    /// Check that every cluster and code type used by a policy has a plugin,
    /// and let cluster plugins validate their clusters.
    pub fn validate_policy(&self, policy: &Policy) -> Result<()> {
        let mut errors = Vec::new();

        for cluster in policy.clusters() {
            match self.cluster_plugin(cluster.cluster_type) {
                Ok(plugin) => {
                    if let Err(err) = plugin.validate(cluster) {
                        errors.push(format!("cluster '{}': {:#}", cluster.metadata.name, err));
                    }
                }
                Err(err) => errors.push(format!("cluster '{}': {}", cluster.metadata.name, err)),
            }
        }

        let cluster_types: Vec<ClusterType> = policy
            .clusters()
            .iter()
            .map(|c| c.cluster_type)
            .collect();
        for ns in policy.namespaces.values() {
            for service in ns.services.values() {
                for component in &service.components {
                    let Some(code) = &component.code else {
                        continue;
                    };
                    for cluster_type in &cluster_types {
                        if self.code_plugin(*cluster_type, code.code_type).is_err() {
                            errors.push(format!(
                                "service '{}' component '{}': no plugin for code type '{}' on cluster type '{}'",
                                service.metadata.name, component.name, code.code_type, cluster_type
                            ));
                        }
                    }
                }
            }
        }

        errors.sort();
        errors.dedup();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}
