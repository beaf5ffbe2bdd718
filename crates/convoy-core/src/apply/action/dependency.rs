use anyhow::Result;

use super::{Action, ActionContext, ActionKind};
use crate::resolve::ComponentInstanceKey;
use crate::types::Generation;

/// Point a dependency at the root instance it now resolves to.
#[derive(Debug, Clone)]
pub struct DependencyAttach {
    pub dependency: String,
    pub root: ComponentInstanceKey,
    pub revision: Generation,
}

impl Action for DependencyAttach {
    fn kind(&self) -> ActionKind {
        ActionKind::DependencyAttach
    }

    fn name(&self) -> String {
        format!("{} {} -> {}", self.kind(), self.dependency, self.root)
    }

    fn revision(&self) -> Generation {
        self.revision
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        ctx.state.attach_dependency(&self.dependency, &self.root)?;
        ctx.event_log
            .info("dependency attached")
            .with("dependency", &self.dependency)
            .with("instance", &self.root);
        Ok(())
    }
}

/// Drop the link between a dependency and the root it used to resolve to.
#[derive(Debug, Clone)]
pub struct DependencyDetach {
    pub dependency: String,
    pub root: ComponentInstanceKey,
    pub revision: Generation,
}

impl Action for DependencyDetach {
    fn kind(&self) -> ActionKind {
        ActionKind::DependencyDetach
    }

    fn name(&self) -> String {
        format!("{} {} -> {}", self.kind(), self.dependency, self.root)
    }

    fn revision(&self) -> Generation {
        self.revision
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        ctx.state.detach_dependency(&self.dependency, &self.root)?;
        ctx.event_log
            .info("dependency detached")
            .with("dependency", &self.dependency)
            .with("instance", &self.root);
        Ok(())
    }
}
