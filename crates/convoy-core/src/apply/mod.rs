//! Apply engine.
//!
//! Executes diff actions strictly in order against the plugin registry. A
//! failing or panicking action is logged, counted and skipped; the run always
//! continues to the next action and hands back the best-effort actual state.

pub mod action;
pub mod progress;
pub mod state;

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe, catch_unwind};
use std::sync::Once;
use tracing::{error, info};

pub use action::{
    Action, ActionContext, ActionKind, ClustersPostProcess, ComponentCreate, ComponentDelete,
    ComponentUpdate, DependencyAttach, DependencyDetach,
};
pub use progress::{NoopProgress, ProgressIndicator, TracingProgress};
pub use state::{ActualStateUpdater, StateUpdater};

use crate::error::Error;
use crate::event::EventLog;
use crate::external::ExternalData;
use crate::lang::Policy;
use crate::plugin::PluginRegistry;
use crate::resolve::PolicyResolution;

/// Result of an apply run.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Actual state after every successful action
    pub actual_state: PolicyResolution,
    pub event_log: EventLog,
    /// Per-action failures in execution order
    pub failures: Vec<Error>,
    pub total: usize,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregate error, if any action failed.
    pub fn error(&self) -> Option<Error> {
        (!self.failures.is_empty()).then(|| Error::ApplyFailed {
            failed: self.failures.len(),
            total: self.total,
        })
    }
}

/// Runs one ordered batch of actions.
pub struct EngineApply<'a> {
    desired_policy: &'a Policy,
    desired_state: &'a PolicyResolution,
    actual_policy: &'a Policy,
    external: &'a ExternalData,
    plugins: &'a PluginRegistry,
    progress: Box<dyn ProgressIndicator + 'a>,
}

impl<'a> EngineApply<'a> {
    pub fn new(
        desired_policy: &'a Policy,
        desired_state: &'a PolicyResolution,
        actual_policy: &'a Policy,
        external: &'a ExternalData,
        plugins: &'a PluginRegistry,
    ) -> Self {
        Self {
            desired_policy,
            desired_state,
            actual_policy,
            external,
            plugins,
            progress: Box::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressIndicator + 'a) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Apply `actions` on top of `actual_state`.
    pub fn apply(
        mut self,
        actual_state: PolicyResolution,
        actions: &[Box<dyn Action>],
    ) -> ApplyOutcome {
        let mut updater = ActualStateUpdater::new(actual_state);
        let mut event_log = EventLog::new();
        let mut failures = Vec::new();

        self.progress.set_total(actions.len());

        for action in actions {
            let name = action.name();
            let result = {
                let mut ctx = ActionContext {
                    desired_policy: self.desired_policy,
                    desired_state: self.desired_state,
                    actual_policy: self.actual_policy,
                    external: self.external,
                    plugins: self.plugins,
                    state: &mut updater,
                    event_log: &mut event_log,
                };
                run_isolated(action.as_ref(), &mut ctx)
            };

            if let Err(err) = result {
                error!(action = %name, "{}", err);
                event_log
                    .error(err.to_string())
                    .with("action", &name)
                    .with("revision", action.revision());
                failures.push(err);
            }
            self.progress.advance(&name);
        }

        self.progress.done(failures.is_empty());
        info!(
            total = actions.len(),
            failed = failures.len(),
            "Apply run finished"
        );

        ApplyOutcome {
            actual_state: updater.into_state(),
            event_log,
            failures,
            total: actions.len(),
        }
    }
}

thread_local! {
    static ISOLATING: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static TRACE_HOOK: Once = Once::new();

/// Chain a panic hook that records the backtrace at the panic site while an
/// action runs on this thread.
fn install_trace_hook() {
    TRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if ISOLATING.with(Cell::get) {
                let trace = Backtrace::force_capture().to_string();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

/// Run one action, converting both returned errors and panics into [`Error`].
fn run_isolated(action: &dyn Action, ctx: &mut ActionContext<'_>) -> Result<(), Error> {
    install_trace_hook();
    ISOLATING.with(|flag| flag.set(true));
    let result = catch_unwind(AssertUnwindSafe(|| action.apply(ctx)));
    ISOLATING.with(|flag| flag.set(false));

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::ActionFailed {
            action: action.name(),
            message: format!("{:#}", err),
        }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "(non-string panic)".to_string());
            let backtrace = PANIC_TRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| Backtrace::force_capture().to_string());
            Err(Error::ActionPanicked {
                action: action.name(),
                message,
                backtrace,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolution::tests::chain;
    use crate::types::Generation;
    use anyhow::bail;

    #[derive(Debug)]
    struct Scripted {
        name: &'static str,
        outcome: Outcome,
    }

    #[derive(Debug, Clone, Copy)]
    enum Outcome {
        Succeed,
        Fail,
        Panic,
    }

    impl Action for Scripted {
        fn kind(&self) -> ActionKind {
            ActionKind::ClustersPostProcess
        }

        fn name(&self) -> String {
            self.name.to_string()
        }

        fn revision(&self) -> Generation {
            Generation(3)
        }

        fn apply(&self, ctx: &mut ActionContext<'_>) -> anyhow::Result<()> {
            match self.outcome {
                Outcome::Succeed => {
                    ctx.event_log.info("ran").with("action", self.name);
                    Ok(())
                }
                Outcome::Fail => bail!("plugin refused"),
                Outcome::Panic => panic!("plugin blew up"),
            }
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        advanced: Vec<String>,
        done: Option<bool>,
    }

    impl ProgressIndicator for &mut Recorder {
        fn set_total(&mut self, _total: usize) {}

        fn advance(&mut self, action: &str) {
            self.advanced.push(action.to_string());
        }

        fn done(&mut self, success: bool) {
            self.done = Some(success);
        }
    }

    fn scripted(name: &'static str, outcome: Outcome) -> Box<dyn Action> {
        Box::new(Scripted { name, outcome })
    }

    #[test]
    fn test_failures_are_isolated() {
        let policy = Policy::new();
        let desired = PolicyResolution::new();
        let external = ExternalData::from_users([]);
        let plugins = PluginRegistry::new();
        let mut recorder = Recorder::default();

        let actions = vec![
            scripted("first", Outcome::Succeed),
            scripted("boom", Outcome::Panic),
            scripted("refused", Outcome::Fail),
            scripted("last", Outcome::Succeed),
        ];
        let outcome = EngineApply::new(&policy, &desired, &policy, &external, &plugins)
            .with_progress(&mut recorder)
            .apply(chain(), &actions);

        assert_eq!(outcome.failures.len(), 2);
        assert!(matches!(
            &outcome.failures[0],
            Error::ActionPanicked { action, message, .. }
                if action == "boom" && message == "plugin blew up"
        ));
        assert!(matches!(&outcome.failures[1], Error::ActionFailed { action, .. } if action == "refused"));
        // captured where the panic happened, not where it was caught
        let Error::ActionPanicked { backtrace, .. } = &outcome.failures[0] else {
            unreachable!()
        };
        assert!(backtrace.contains("Scripted"), "{backtrace}");
        assert!(matches!(
            outcome.error(),
            Some(Error::ApplyFailed { failed: 2, total: 4 })
        ));

        // the action after the failures still ran
        let ran: Vec<_> = outcome
            .event_log
            .events()
            .iter()
            .filter(|e| e.message == "ran")
            .filter_map(|e| e.field("action"))
            .collect();
        assert_eq!(ran, vec!["first", "last"]);
        assert_eq!(outcome.event_log.error_count(), 2);
        assert_eq!(outcome.actual_state, chain());

        assert_eq!(recorder.advanced, vec!["first", "boom", "refused", "last"]);
        assert_eq!(recorder.done, Some(false));
    }

    #[test]
    fn test_clean_run() {
        let policy = Policy::new();
        let desired = PolicyResolution::new();
        let external = ExternalData::from_users([]);
        let plugins = PluginRegistry::new();

        let outcome = EngineApply::new(&policy, &desired, &policy, &external, &plugins)
            .apply(PolicyResolution::new(), &[scripted("only", Outcome::Succeed)]);
        assert!(outcome.is_success());
        assert!(outcome.error().is_none());
        assert_eq!(outcome.total, 1);
    }
}
