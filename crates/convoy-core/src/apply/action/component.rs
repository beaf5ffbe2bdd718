use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::{Action, ActionContext, ActionKind};
use crate::resolve::{ComponentInstance, ComponentInstanceKey};
use crate::types::Generation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeOp {
    Create,
    Update,
    Destroy,
}

/// Run the code plugin for an instance. Service roots carry no code and
/// only exist in state.
fn run_code(ctx: &mut ActionContext<'_>, instance: &ComponentInstance, op: CodeOp) -> Result<()> {
    let Some(code) = &instance.code else {
        return Ok(());
    };
    let cluster = ctx.cluster(&instance.cluster)?;
    let plugin = ctx.plugins.code_plugin(cluster.cluster_type, code.code_type)?;
    debug!(instance = %instance.key, cluster = %cluster.metadata.name, ?op, "Running code plugin");
    match op {
        CodeOp::Create => plugin.create(cluster, instance),
        CodeOp::Update => plugin.update(cluster, instance),
        CodeOp::Destroy => plugin.destroy(cluster, instance),
    }
}

fn desired_instance(ctx: &ActionContext<'_>, key: &ComponentInstanceKey) -> Result<ComponentInstance> {
    ctx.desired_state
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow!("component instance '{}' is not in the desired state", key))
}

#[derive(Debug, Clone)]
pub struct ComponentCreate {
    pub key: ComponentInstanceKey,
    pub revision: Generation,
}

impl Action for ComponentCreate {
    fn kind(&self) -> ActionKind {
        ActionKind::ComponentCreate
    }

    fn name(&self) -> String {
        format!("{} {}", self.kind(), self.key)
    }

    fn revision(&self) -> Generation {
        self.revision
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let instance = desired_instance(ctx, &self.key)?;
        run_code(ctx, &instance, CodeOp::Create)
            .with_context(|| format!("Failed to create component instance '{}'", self.key))?;
        ctx.state.create_instance(instance)?;
        ctx.event_log
            .info("component instance created")
            .with("instance", &self.key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ComponentUpdate {
    pub key: ComponentInstanceKey,
    pub revision: Generation,
}

impl Action for ComponentUpdate {
    fn kind(&self) -> ActionKind {
        ActionKind::ComponentUpdate
    }

    fn name(&self) -> String {
        format!("{} {}", self.kind(), self.key)
    }

    fn revision(&self) -> Generation {
        self.revision
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let instance = desired_instance(ctx, &self.key)?;
        run_code(ctx, &instance, CodeOp::Update)
            .with_context(|| format!("Failed to update component instance '{}'", self.key))?;
        ctx.state.update_instance(instance)?;
        ctx.event_log
            .info("component instance updated")
            .with("instance", &self.key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ComponentDelete {
    pub key: ComponentInstanceKey,
    pub revision: Generation,
}

impl Action for ComponentDelete {
    fn kind(&self) -> ActionKind {
        ActionKind::ComponentDelete
    }

    fn name(&self) -> String {
        format!("{} {}", self.kind(), self.key)
    }

    fn revision(&self) -> Generation {
        self.revision
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let instance = ctx
            .state
            .state()
            .get(&self.key)
            .cloned()
            .ok_or_else(|| anyhow!("component instance '{}' is not in the actual state", self.key))?;
        run_code(ctx, &instance, CodeOp::Destroy)
            .with_context(|| format!("Failed to destroy component instance '{}'", self.key))?;
        ctx.state.delete_instance(&self.key)?;
        ctx.event_log
            .info("component instance deleted")
            .with("instance", &self.key);
        Ok(())
    }
}
