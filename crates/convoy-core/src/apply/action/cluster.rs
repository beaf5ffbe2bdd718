use anyhow::{Context, Result};

use super::{Action, ActionContext, ActionKind};
use crate::types::Generation;

/// Let plugins finalize batched changes on one cluster.
#[derive(Debug, Clone)]
pub struct ClustersPostProcess {
    pub cluster: String,
    pub revision: Generation,
}

impl Action for ClustersPostProcess {
    fn kind(&self) -> ActionKind {
        ActionKind::ClustersPostProcess
    }

    fn name(&self) -> String {
        format!("{} {}", self.kind(), self.cluster)
    }

    fn revision(&self) -> Generation {
        self.revision
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let cluster = ctx.cluster(&self.cluster)?;
        ctx.plugins
            .cluster_plugin(cluster.cluster_type)?
            .post_process(cluster)
            .with_context(|| format!("Post-processing failed for cluster '{}'", self.cluster))?;

        for plugin in ctx.plugins.post_process_plugins() {
            plugin
                .post_process(cluster, ctx.state.state())
                .with_context(|| {
                    format!(
                        "Post-process plugin '{}' failed for cluster '{}'",
                        plugin.name(),
                        self.cluster
                    )
                })?;
        }

        ctx.event_log
            .info("cluster post-processed")
            .with("cluster", &self.cluster);
        Ok(())
    }
}
