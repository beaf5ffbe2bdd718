//! Mutations of the actual state performed by actions.

use anyhow::{Result, bail};

use crate::resolve::{ComponentInstance, ComponentInstanceKey, PolicyResolution};

/// Records what actions actually achieved.
pub trait StateUpdater {
    fn state(&self) -> &PolicyResolution;

    fn create_instance(&mut self, instance: ComponentInstance) -> Result<()>;

    fn update_instance(&mut self, instance: ComponentInstance) -> Result<()>;

    fn delete_instance(&mut self, key: &ComponentInstanceKey) -> Result<()>;

    fn attach_dependency(&mut self, dependency: &str, root: &ComponentInstanceKey) -> Result<()>;

    fn detach_dependency(&mut self, dependency: &str, root: &ComponentInstanceKey) -> Result<()>;
}

/// Updates an in-memory copy of the actual state.
#[derive(Debug, Clone, Default)]
pub struct ActualStateUpdater {
    state: PolicyResolution,
}

impl ActualStateUpdater {
    pub fn new(actual: PolicyResolution) -> Self {
        Self { state: actual }
    }

    pub fn into_state(self) -> PolicyResolution {
        self.state
    }

    fn link(&mut self, instance: &ComponentInstance) {
        for dep in &instance.depends_on {
            if let Some(other) = self.state.instances.get_mut(dep) {
                other.dependents.insert(instance.key.clone());
            }
        }
        for dependent in &instance.dependents {
            if let Some(other) = self.state.instances.get_mut(dependent) {
                other.depends_on.insert(instance.key.clone());
            }
        }
    }
}

impl StateUpdater for ActualStateUpdater {
    fn state(&self) -> &PolicyResolution {
        &self.state
    }

    fn create_instance(&mut self, instance: ComponentInstance) -> Result<()> {
        if self.state.contains(&instance.key) {
            bail!("component instance '{}' already exists", instance.key);
        }
        self.link(&instance);
        self.state.insert(instance);
        Ok(())
    }

    fn update_instance(&mut self, mut instance: ComponentInstance) -> Result<()> {
        let Some(existing) = self.state.instances.get(&instance.key) else {
            bail!("component instance '{}' does not exist", instance.key);
        };
        // keep edges to instances that are still present in the actual state
        instance.dependents.extend(existing.dependents.iter().cloned());
        instance.dependencies.extend(existing.dependencies.iter().cloned());
        self.link(&instance);
        self.state.insert(instance);
        Ok(())
    }

    fn delete_instance(&mut self, key: &ComponentInstanceKey) -> Result<()> {
        if self.state.instances.remove(key).is_none() {
            bail!("component instance '{}' does not exist", key);
        }
        for other in self.state.instances.values_mut() {
            other.depends_on.remove(key);
            other.dependents.remove(key);
        }
        Ok(())
    }

    fn attach_dependency(&mut self, dependency: &str, root: &ComponentInstanceKey) -> Result<()> {
        if !self.state.contains(root) {
            bail!(
                "cannot attach dependency '{}': instance '{}' does not exist",
                dependency,
                root
            );
        }
        self.state
            .dependencies
            .insert(dependency.to_string(), root.clone());
        self.state.add_dependency(root, dependency);
        Ok(())
    }

    fn detach_dependency(&mut self, dependency: &str, root: &ComponentInstanceKey) -> Result<()> {
        if self.state.dependencies.get(dependency) == Some(root) {
            self.state.dependencies.remove(dependency);
        }
        let still_attached = self.state.dependencies.get(dependency).cloned();
        for instance in self.state.instances.values_mut() {
            instance.dependencies.remove(dependency);
        }
        if let Some(current) = still_attached {
            self.state.add_dependency(&current, dependency);
        }
        Ok(())
    }
}
