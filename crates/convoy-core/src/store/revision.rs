//! Revisions: one record per enforcement pass that produced changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Generation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevisionStatus {
    InProgress,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionProgress {
    pub current: usize,
    pub total: usize,
}

/// Tracks applying one policy generation.
///
/// A pass that plans exactly the same actions as a failed revision for the
/// same policy generation retries that revision instead of opening a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub generation: Generation,
    pub policy_generation: Generation,
    pub created_at: DateTime<Utc>,
    pub status: RevisionStatus,
    #[serde(default)]
    pub progress: RevisionProgress,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Digest of the planned action names
    #[serde(default)]
    pub plan: String,
    #[serde(default = "first_attempt")]
    pub attempts: u32,
}

fn first_attempt() -> u32 {
    1
}

/// Digest identifying an ordered list of action names.
pub fn plan_digest<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = blake3::Hasher::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

impl Revision {
    pub fn new(generation: Generation, policy_generation: Generation) -> Self {
        Self {
            generation,
            policy_generation,
            created_at: Utc::now(),
            status: RevisionStatus::InProgress,
            progress: RevisionProgress::default(),
            errors: Vec::new(),
            plan: String::new(),
            attempts: first_attempt(),
        }
    }

    pub fn with_plan(mut self, plan: String) -> Self {
        self.plan = plan;
        self
    }

    /// Whether a pass planning `plan` for `policy_generation` should retry
    /// this revision.
    pub fn is_retried_by(&self, policy_generation: Generation, plan: &str) -> bool {
        self.status == RevisionStatus::Error
            && self.policy_generation == policy_generation
            && self.plan == plan
    }

    /// Reopen a failed revision for another attempt.
    pub fn retry(&mut self) {
        self.attempts += 1;
        self.status = RevisionStatus::InProgress;
        self.progress = RevisionProgress::default();
        self.errors.clear();
    }

    /// Mark the revision finished after `applied` of `total` actions ran.
    pub fn finish(&mut self, applied: usize, total: usize, errors: Vec<String>) {
        self.progress = RevisionProgress {
            current: applied,
            total,
        };
        self.status = if errors.is_empty() {
            RevisionStatus::Success
        } else {
            RevisionStatus::Error
        };
        self.errors = errors;
    }

    pub fn is_finished(&self) -> bool {
        self.status != RevisionStatus::InProgress
    }
}
