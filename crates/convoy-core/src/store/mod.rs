//! Persistence for policy generations, the actual state and revisions.
//!
//! The pipeline only needs atomic "read latest" and "write next generation"
//! operations; [`LocalStore`] provides them in memory with an optional JSON
//! snapshot on disk, shared between processes through lock files.

pub mod local;
pub mod lock;
pub mod revision;

use anyhow::Result;
use std::fmt;

pub use local::LocalStore;
pub use lock::StoreLock;
pub use revision::{Revision, RevisionProgress, RevisionStatus, plan_digest};

use crate::lang::{ObjectKey, Policy, PolicyObject};
use crate::resolve::PolicyResolution;
use crate::types::Generation;

/// Backing store shared by the API path and the enforcer.
pub trait Store: Send + Sync + fmt::Debug {
    /// Exclusive right to run one resolve + diff + apply pass, held until
    /// the returned lock is dropped. Blocks while another handle, possibly
    /// in another process, holds it.
    fn lock_pass(&self) -> Result<StoreLock>;

    /// Policy at `generation`, or the latest one. An empty store yields an
    /// empty policy at [`Generation::ZERO`].
    fn get_policy(&self, generation: Option<Generation>) -> Result<(Policy, Generation)>;

    /// Apply object changes on top of the latest policy.
    ///
    /// Returns whether anything changed and the resulting generation; no new
    /// generation is written when the policy is unchanged.
    fn update_policy(
        &self,
        updated: Vec<PolicyObject>,
        deleted: Vec<ObjectKey>,
        author: &str,
    ) -> Result<(bool, Generation)>;

    fn get_actual_state(&self) -> Result<PolicyResolution>;

    fn save_actual_state(&self, state: &PolicyResolution) -> Result<()>;

    /// Allocate the next revision for `policy_generation`. Nothing is stored
    /// until [`Store::save_revision`].
    fn new_revision(&self, policy_generation: Generation) -> Result<Revision>;

    fn save_revision(&self, revision: &Revision) -> Result<()>;

    /// Revision at `generation`, or the latest one.
    fn get_revision(&self, generation: Option<Generation>) -> Result<Option<Revision>>;

    /// Latest revision that finished without errors.
    fn get_last_successful_revision(&self) -> Result<Option<Revision>>;
}
