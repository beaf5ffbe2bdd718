//! In-process store with an optional JSON snapshot file.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::lock::{StoreLock, sibling};
use super::{Revision, RevisionStatus, Store};
use crate::lang::{ObjectKey, Policy, PolicyObject};
use crate::resolve::PolicyResolution;
use crate::types::Generation;

/// Revisions kept by default besides the latest successful one.
pub const DEFAULT_MAX_REVISIONS: usize = 100;

/// One stored policy generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyRecord {
    generation: Generation,
    author: String,
    created_at: DateTime<Utc>,
    policy: Policy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    policies: Vec<PolicyRecord>,
    #[serde(default)]
    actual_state: PolicyResolution,
    #[serde(default)]
    revisions: Vec<Revision>,
}

impl Snapshot {
    fn latest_policy(&self) -> Option<&PolicyRecord> {
        self.policies.last()
    }

    fn latest_revision(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    fn last_successful_revision(&self) -> Option<&Revision> {
        self.revisions
            .iter()
            .rev()
            .find(|r| r.status == RevisionStatus::Success)
    }

    /// Drop the oldest revisions beyond `keep`, sparing the latest successful one.
    fn prune_revisions(&mut self, keep: usize) {
        let spared = self.last_successful_revision().map(|r| r.generation);
        let others = self.revisions.len() - usize::from(spared.is_some());
        let Some(excess) = others.checked_sub(keep).filter(|n| *n > 0) else {
            return;
        };
        let mut dropped = 0;
        self.revisions.retain(|r| {
            if dropped < excess && Some(r.generation) != spared {
                dropped += 1;
                false
            } else {
                true
            }
        });
        debug!(dropped, kept = self.revisions.len(), "Pruned revisions");
    }
}

/// Store holding every policy generation and recent revisions.
///
/// When opened with a path, every read and write goes through the snapshot
/// file under an exclusive lock on `<path>.lock`: reads reload the file, and
/// mutations reload, modify and write it atomically (temp file + rename). Any
/// number of handles, in any number of processes, can share one path.
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    max_revisions: usize,
    inner: Mutex<Snapshot>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            max_revisions: DEFAULT_MAX_REVISIONS,
            inner: Mutex::new(Snapshot::default()),
        }
    }

    /// Open a store backed by `path`, loading the snapshot if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: Some(path.into()),
            max_revisions: DEFAULT_MAX_REVISIONS,
            inner: Mutex::new(Snapshot::default()),
        };
        store.read(|_| Ok(()))?;
        Ok(store)
    }

    /// Keep at most `max` revisions plus the latest successful one.
    pub fn with_max_revisions(mut self, max: usize) -> Self {
        self.max_revisions = max.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Take the pass lock only if no other handle holds it.
    pub fn try_lock_pass(&self) -> Result<Option<StoreLock>> {
        match &self.path {
            Some(path) => StoreLock::try_acquire(&sibling(path, "pass.lock")),
            None => Ok(Some(StoreLock::unlocked())),
        }
    }

    fn lock_file(&self) -> Result<StoreLock> {
        match &self.path {
            Some(path) => StoreLock::acquire(&sibling(path, "lock")),
            None => Ok(StoreLock::unlocked()),
        }
    }

    /// Replace `snapshot` with the file contents, if the file exists.
    fn reload(&self, snapshot: &mut Snapshot) -> Result<()> {
        if let Some(path) = &self.path
            && path.exists()
        {
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read store: {}", path.display()))?;
            *snapshot = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse store: {}", path.display()))?;
        }
        Ok(())
    }

    /// Run `f` on the latest snapshot.
    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock();
        let _lock = self.lock_file()?;
        self.reload(&mut guard)?;
        f(&guard)
    }

    /// Run `f` on a copy of the latest snapshot, persist it, then publish it.
    fn mutate<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock();
        let _lock = self.lock_file()?;
        self.reload(&mut guard)?;
        let mut next = guard.clone();
        let value = f(&mut next)?;
        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        *guard = next;
        Ok(value)
    }
}

fn write_atomic(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
    }

    let bytes = serde_json::to_vec_pretty(snapshot).context("Failed to serialize store")?;
    let tmp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp_path, bytes)
        .with_context(|| format!("Failed to write tmp store: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename tmp store: {}", tmp_path.display()))?;
    debug!(path = %path.display(), "Store saved");
    Ok(())
}

impl Store for LocalStore {
    fn lock_pass(&self) -> Result<StoreLock> {
        match &self.path {
            Some(path) => StoreLock::acquire(&sibling(path, "pass.lock")),
            None => Ok(StoreLock::unlocked()),
        }
    }

    fn get_policy(&self, generation: Option<Generation>) -> Result<(Policy, Generation)> {
        self.read(|snapshot| {
            let record = match generation {
                None => snapshot.latest_policy(),
                Some(generation) => Some(
                    snapshot
                        .policies
                        .iter()
                        .find(|r| r.generation == generation)
                        .ok_or_else(|| anyhow!("policy generation {} not found", generation))?,
                ),
            };
            Ok(record
                .map(|r| (r.policy.clone(), r.generation))
                .unwrap_or_else(|| (Policy::new(), Generation::ZERO)))
        })
    }

    fn update_policy(
        &self,
        updated: Vec<PolicyObject>,
        deleted: Vec<ObjectKey>,
        author: &str,
    ) -> Result<(bool, Generation)> {
        self.mutate(|snapshot| {
            let (current, generation) = snapshot
                .latest_policy()
                .map(|r| (r.policy.clone(), r.generation))
                .unwrap_or_else(|| (Policy::new(), Generation::ZERO));

            let mut policy = current.clone();
            for key in &deleted {
                policy.remove_object(key);
            }
            for object in updated {
                policy.add_object(object)?;
            }

            if policy == current {
                return Ok((false, generation));
            }

            let next = generation.next();
            snapshot.policies.push(PolicyRecord {
                generation: next,
                author: author.to_string(),
                created_at: Utc::now(),
                policy,
            });
            debug!(generation = %next, author, "Stored policy generation");
            Ok((true, next))
        })
    }

    fn get_actual_state(&self) -> Result<PolicyResolution> {
        self.read(|snapshot| Ok(snapshot.actual_state.clone()))
    }

    fn save_actual_state(&self, state: &PolicyResolution) -> Result<()> {
        self.mutate(|snapshot| {
            snapshot.actual_state = state.clone();
            Ok(())
        })
    }

    fn new_revision(&self, policy_generation: Generation) -> Result<Revision> {
        self.read(|snapshot| {
            let generation = snapshot
                .latest_revision()
                .map(|r| r.generation)
                .unwrap_or(Generation::ZERO)
                .next();
            Ok(Revision::new(generation, policy_generation))
        })
    }

    fn save_revision(&self, revision: &Revision) -> Result<()> {
        let max_revisions = self.max_revisions;
        self.mutate(|snapshot| {
            match snapshot
                .revisions
                .iter_mut()
                .find(|r| r.generation == revision.generation)
            {
                Some(existing) => *existing = revision.clone(),
                None => snapshot.revisions.push(revision.clone()),
            }
            snapshot.prune_revisions(max_revisions);
            Ok(())
        })
    }

    fn get_revision(&self, generation: Option<Generation>) -> Result<Option<Revision>> {
        self.read(|snapshot| {
            Ok(match generation {
                None => snapshot.latest_revision().cloned(),
                Some(generation) => snapshot
                    .revisions
                    .iter()
                    .find(|r| r.generation == generation)
                    .cloned(),
            })
        })
    }

    fn get_last_successful_revision(&self) -> Result<Option<Revision>> {
        self.read(|snapshot| Ok(snapshot.last_successful_revision().cloned()))
    }
}
