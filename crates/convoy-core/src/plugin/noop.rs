//! Plugins that only log, optionally sleeping to mimic deployment latency.

use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{ClusterPlugin, CodePlugin};
use crate::lang::{Cluster, ClusterType, CodeType};
use crate::resolve::ComponentInstance;

#[derive(Debug, Clone)]
pub struct NoopClusterPlugin {
    cluster_type: ClusterType,
}

impl NoopClusterPlugin {
    pub fn new(cluster_type: ClusterType) -> Self {
        Self { cluster_type }
    }
}

impl ClusterPlugin for NoopClusterPlugin {
    fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    fn validate(&self, _cluster: &Cluster) -> Result<()> {
        Ok(())
    }

    fn post_process(&self, cluster: &Cluster) -> Result<()> {
        debug!(cluster = %cluster.metadata.name, "noop post-process");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NoopCodePlugin {
    cluster_type: ClusterType,
    code_type: CodeType,
    sleep: Duration,
}

impl NoopCodePlugin {
    pub fn new(cluster_type: ClusterType, code_type: CodeType, sleep: Duration) -> Self {
        Self {
            cluster_type,
            code_type,
            sleep,
        }
    }

    fn pretend(&self, op: &str, cluster: &Cluster, instance: &ComponentInstance) {
        debug!(
            op,
            cluster = %cluster.metadata.name,
            instance = %instance.key,
            "noop code plugin"
        );
        if !self.sleep.is_zero() {
            std::thread::sleep(self.sleep);
        }
    }
}

impl CodePlugin for NoopCodePlugin {
    fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    fn code_type(&self) -> CodeType {
        self.code_type
    }

    fn create(&self, cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        self.pretend("create", cluster, instance);
        Ok(())
    }

    fn update(&self, cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        self.pretend("update", cluster, instance);
        Ok(())
    }

    fn destroy(&self, cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        self.pretend("destroy", cluster, instance);
        Ok(())
    }

    fn endpoints(
        &self,
        _cluster: &Cluster,
        _instance: &ComponentInstance,
    ) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}
