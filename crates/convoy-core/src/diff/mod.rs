//! Diff engine.
//!
//! Compares the desired resolution against the last achieved one and plans
//! the ordered actions that converge them. Planning is a pure function of its
//! two inputs; ties between unrelated instances break on key order.
//!
//! Action order:
//! 1. creates, dependencies before dependents
//! 2. updates of instances whose checksum changed, in the same order
//! 3. dependency attaches, then detaches
//! 4. deletes, dependents before dependencies
//! 5. one post-process per cluster touched by a code instance

use std::collections::{BTreeMap, BTreeSet};

use crate::apply::{
    Action, ActionKind, ClustersPostProcess, ComponentCreate, ComponentDelete, ComponentUpdate,
    DependencyAttach, DependencyDetach,
};
use crate::resolve::{ComponentInstance, PolicyResolution};
use crate::types::Generation;

/// Plan the actions that turn `actual` into `desired`.
pub fn diff(
    desired: &PolicyResolution,
    actual: &PolicyResolution,
    revision: Generation,
) -> Vec<Box<dyn Action>> {
    let mut actions: Vec<Box<dyn Action>> = Vec::new();
    let mut touched = BTreeSet::new();
    let mut touch = |instance: &ComponentInstance| {
        if instance.is_code() {
            touched.insert(instance.cluster.clone());
        }
    };

    let desired_order = desired.topological_order();

    for key in &desired_order {
        if !actual.contains(key)
            && let Some(instance) = desired.get(key)
        {
            touch(instance);
            actions.push(Box::new(ComponentCreate {
                key: key.clone(),
                revision,
            }));
        }
    }

    for key in &desired_order {
        if let (Some(wanted), Some(existing)) = (desired.get(key), actual.get(key))
            && wanted.checksum != existing.checksum
        {
            touch(wanted);
            actions.push(Box::new(ComponentUpdate {
                key: key.clone(),
                revision,
            }));
        }
    }

    for (dependency, root) in &desired.dependencies {
        if actual.dependencies.get(dependency) != Some(root) {
            actions.push(Box::new(DependencyAttach {
                dependency: dependency.clone(),
                root: root.clone(),
                revision,
            }));
        }
    }

    for (dependency, root) in &actual.dependencies {
        if desired.dependencies.get(dependency) != Some(root) {
            actions.push(Box::new(DependencyDetach {
                dependency: dependency.clone(),
                root: root.clone(),
                revision,
            }));
        }
    }

    for key in actual.topological_order().iter().rev() {
        if !desired.contains(key)
            && let Some(instance) = actual.get(key)
        {
            touch(instance);
            actions.push(Box::new(ComponentDelete {
                key: key.clone(),
                revision,
            }));
        }
    }

    for cluster in touched {
        actions.push(Box::new(ClustersPostProcess { cluster, revision }));
    }

    actions
}

/// Action counts per kind, for logs and API responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    counts: BTreeMap<ActionKind, usize>,
}

impl DiffSummary {
    pub fn of(actions: &[Box<dyn Action>]) -> Self {
        let mut counts = BTreeMap::new();
        for action in actions {
            *counts.entry(action.kind()).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("no changes");
        }
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(kind, n)| format!("{} {}", n, kind))
            .collect();
        f.write_str(&parts.join(", "))
    }
}
