//! Enforcement loop and policy updates.
//!
//! Both paths take the same lock, so at most one resolve + diff + apply pass
//! runs at a time in this process; the store's pass lock extends that to
//! every process sharing the store. The synchronous pipeline runs on the
//! blocking pool.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::apply::{EngineApply, TracingProgress};
use crate::context::AppContext;
use crate::diff::{DiffSummary, diff};
use crate::event::{EventLog, TracingSink};
use crate::lang::{ObjectKey, PolicyObject, PolicyView};
use crate::resolve::resolve_all_dependencies;
use crate::store::{RevisionStatus, plan_digest};
use crate::types::Generation;

/// What one enforcement pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforceOutcome {
    pub policy_generation: Generation,
    /// `None` when the actual state already matched the policy
    pub revision: Option<Generation>,
    pub summary: DiffSummary,
    pub failed: usize,
}

/// Response to a policy update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyUpdateResult {
    pub changed: bool,
    pub policy_generation: Generation,
    /// Names of the actions the next enforcement pass will run
    pub actions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Enforcer {
    ctx: AppContext,
    lock: Arc<Mutex<()>>,
}

impl Enforcer {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Run one full pass.
    pub async fn enforce(&self) -> Result<EnforceOutcome> {
        let _guard = self.lock.lock().await;
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || enforce_pass(&ctx))
            .await
            .context("Enforcement pass aborted")?
    }

    /// Enforce every `interval` until `shutdown` completes. Errors are logged
    /// and retried on the next tick.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "Enforcer started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.enforce().await {
                        Ok(outcome) if outcome.failed > 0 => warn!(
                            failed = outcome.failed,
                            summary = %outcome.summary,
                            "Enforcement pass finished with errors"
                        ),
                        Ok(outcome) => debug!(summary = %outcome.summary, "Enforcement pass finished"),
                        Err(err) => error!("Enforcement pass failed: {:#}", err),
                    }
                }
            }
        }
        info!("Enforcer stopped");
    }

    /// Check, store and plan a policy change authored by `author`.
    ///
    /// Nothing is applied; the returned actions are what the next
    /// enforcement pass will run.
    pub async fn update_policy(
        &self,
        updated: Vec<PolicyObject>,
        deleted: Vec<ObjectKey>,
        author: &str,
    ) -> Result<PolicyUpdateResult> {
        let _guard = self.lock.lock().await;
        let ctx = self.ctx.clone();
        let author = author.to_string();
        tokio::task::spawn_blocking(move || update_policy_pass(&ctx, updated, deleted, &author))
            .await
            .context("Policy update aborted")?
    }
}

fn enforce_pass(ctx: &AppContext) -> Result<EnforceOutcome> {
    let store = ctx.store();
    let _pass = store.lock_pass().context("Failed to take the pass lock")?;

    let (policy, policy_generation) = store.get_policy(None).context("Failed to load policy")?;
    let actual_state = store
        .get_actual_state()
        .context("Failed to load actual state")?;

    // the policy the actual state was last fully applied from
    let actual_policy = match store.get_last_successful_revision()? {
        Some(last) if last.policy_generation != policy_generation => {
            store.get_policy(Some(last.policy_generation))?.0
        }
        _ => policy.clone(),
    };

    let (desired_state, mut event_log) = resolve_all_dependencies(&policy, ctx.external())?;

    let mut revision = store.new_revision(policy_generation)?;
    let mut actions = diff(&desired_state, &actual_state, revision.generation);
    let summary = DiffSummary::of(&actions);
    if actions.is_empty() {
        debug!(policy_generation = %policy_generation, "No changes to apply");
        return Ok(EnforceOutcome {
            policy_generation,
            revision: None,
            summary,
            failed: 0,
        });
    }

    let plan = plan_digest(actions.iter().map(|a| a.name()));
    match store.get_revision(None)? {
        Some(mut last) if last.is_retried_by(policy_generation, &plan) => {
            last.retry();
            info!(
                revision = %last.generation,
                attempt = last.attempts,
                "Retrying failed revision"
            );
            actions = diff(&desired_state, &actual_state, last.generation);
            revision = last;
        }
        _ => revision = revision.with_plan(plan),
    }

    let plugins = ctx.plugin_registry();
    plugins.validate_policy(&policy)?;

    info!(
        revision = %revision.generation,
        policy_generation = %policy_generation,
        %summary,
        "Applying new revision"
    );
    store.save_revision(&revision)?;

    let outcome = EngineApply::new(
        &policy,
        &desired_state,
        &actual_policy,
        ctx.external(),
        &plugins,
    )
    .with_progress(TracingProgress::default())
    .apply(actual_state, &actions);

    store
        .save_actual_state(&outcome.actual_state)
        .context("Failed to save actual state")?;

    let failed = outcome.failures.len();
    let errors = outcome.failures.iter().map(|e| e.to_string()).collect();
    revision.finish(outcome.total, outcome.total, errors);
    store.save_revision(&revision)?;
    if revision.status == RevisionStatus::Error {
        warn!(revision = %revision.generation, failed, "Revision finished with errors");
    }

    event_log.append(outcome.event_log);
    save_events(&event_log);

    Ok(EnforceOutcome {
        policy_generation,
        revision: Some(revision.generation),
        summary,
        failed,
    })
}

fn update_policy_pass(
    ctx: &AppContext,
    updated: Vec<PolicyObject>,
    deleted: Vec<ObjectKey>,
    author: &str,
) -> Result<PolicyUpdateResult> {
    let store = ctx.store();
    let _pass = store.lock_pass().context("Failed to take the pass lock")?;
    let user = ctx.external().user(author)?;
    let (current, _) = store.get_policy(None).context("Failed to load policy")?;

    let view = PolicyView::new(&current, &user)?;
    for object in &updated {
        view.manage_object(object)?;
    }
    for key in &deleted {
        if let Some(object) = current.get_object(key) {
            view.manage_object(&object)?;
        }
    }

    let mut next = current.clone();
    for key in &deleted {
        next.remove_object(key);
    }
    for object in updated.iter().cloned() {
        next.add_object(object)?;
    }
    next.validate()?;
    ctx.plugin_registry().validate_policy(&next)?;

    let (changed, policy_generation) = store
        .update_policy(updated, deleted, &user.id)
        .context("Failed to store policy")?;

    let (desired_state, event_log) = resolve_all_dependencies(&next, ctx.external())?;
    let actual_state = store
        .get_actual_state()
        .context("Failed to load actual state")?;
    let revision = store.new_revision(policy_generation)?;
    let actions = diff(&desired_state, &actual_state, revision.generation);
    save_events(&event_log);

    info!(
        changed,
        policy_generation = %policy_generation,
        author = %user.id,
        summary = %DiffSummary::of(&actions),
        "Policy updated"
    );

    Ok(PolicyUpdateResult {
        changed,
        policy_generation,
        actions: actions.iter().map(|a| a.name()).collect(),
    })
}

fn save_events(event_log: &EventLog) {
    if let Err(err) = event_log.save(&mut TracingSink) {
        warn!("Failed to save event log: {:#}", err);
    }
}
