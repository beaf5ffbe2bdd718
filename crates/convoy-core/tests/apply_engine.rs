//! Applying planned actions through plugins.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use parking_lot::Mutex;

use convoy_core::Error;
use convoy_core::apply::{EngineApply, TracingProgress};
use convoy_core::diff::diff;
use convoy_core::lang::{Cluster, ClusterType, CodeType, Policy};
use convoy_core::plugin::{CodePlugin, PluginRegistry, PostProcessPlugin};
use convoy_core::resolve::{ComponentInstance, PolicyResolution};
use convoy_core::types::Generation;

use support::{BASELINE, ERIN_ANALYTICS, external, policy_with, resolve};

type Calls = Arc<Mutex<Vec<String>>>;

/// Records calls and misbehaves for chosen components.
#[derive(Debug)]
struct ScriptedHelm {
    calls: Calls,
    panic_on: Option<&'static str>,
    fail_on: Option<&'static str>,
}

impl ScriptedHelm {
    fn record(&self, op: &str, instance: &ComponentInstance) -> Result<()> {
        if self.panic_on == Some(instance.component.as_str()) {
            panic!("helm crashed on {}", instance.component);
        }
        if self.fail_on == Some(instance.component.as_str()) {
            bail!("helm rejected {}", instance.component);
        }
        self.calls.lock().push(format!("{} {}", op, instance.key));
        Ok(())
    }
}

impl CodePlugin for ScriptedHelm {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Kubernetes
    }

    fn code_type(&self) -> CodeType {
        CodeType::Helm
    }

    fn create(&self, _cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        self.record("create", instance)
    }

    fn update(&self, _cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        self.record("update", instance)
    }

    fn destroy(&self, _cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        self.record("destroy", instance)
    }

    fn endpoints(
        &self,
        _cluster: &Cluster,
        _instance: &ComponentInstance,
    ) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

#[derive(Debug)]
struct CountingPostProcess {
    calls: Calls,
}

impl PostProcessPlugin for CountingPostProcess {
    fn name(&self) -> &str {
        "counting"
    }

    fn post_process(&self, cluster: &Cluster, _state: &PolicyResolution) -> Result<()> {
        self.calls
            .lock()
            .push(format!("post-process {}", cluster.metadata.name));
        Ok(())
    }
}

fn registry(
    calls: &Calls,
    panic_on: Option<&'static str>,
    fail_on: Option<&'static str>,
) -> PluginRegistry {
    let mut plugins = PluginRegistry::with_noop_plugins(Duration::ZERO);
    plugins.register_code(Box::new(ScriptedHelm {
        calls: calls.clone(),
        panic_on,
        fail_on,
    }));
    plugins.register_post_process(Box::new(CountingPostProcess {
        calls: calls.clone(),
    }));
    plugins
}

#[test]
fn applying_creates_converges_actual_state() {
    let ext = external();
    let policy = policy_with(&BASELINE);
    let desired = resolve(&policy, &ext);
    let calls = Calls::default();
    let plugins = registry(&calls, None, None);

    let actions = diff(&desired, &PolicyResolution::new(), Generation(1));
    let outcome = EngineApply::new(&policy, &desired, &Policy::new(), &ext, &plugins)
        .with_progress(TracingProgress::default())
        .apply(PolicyResolution::new(), &actions);

    assert!(outcome.is_success(), "{:?}", outcome.failures);
    assert_eq!(outcome.actual_state, desired);
    assert!(diff(&desired, &outcome.actual_state, Generation(2)).is_empty());

    let calls = calls.lock();
    // kafka and zookeeper code on two clusters, then one post-process each
    assert_eq!(calls.iter().filter(|c| c.starts_with("create ")).count(), 4);
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.starts_with("post-process "))
            .cloned()
            .collect::<Vec<_>>(),
        vec!["post-process cluster-us-east", "post-process cluster-us-west"]
    );
}

#[test]
fn failing_actions_do_not_stop_the_run() {
    let ext = external();
    let policy = policy_with(&[ERIN_ANALYTICS]);
    let desired = resolve(&policy, &ext);
    let calls = Calls::default();
    let plugins = registry(&calls, Some("spark"), Some("hdfs"));

    let actions = diff(&desired, &PolicyResolution::new(), Generation(1));
    let outcome = EngineApply::new(&policy, &desired, &Policy::new(), &ext, &plugins)
        .apply(PolicyResolution::new(), &actions);

    assert_eq!(outcome.failures.len(), 2);
    assert!(
        outcome.failures.iter().any(|e| matches!(
            e,
            Error::ActionPanicked { message, backtrace, .. }
                if message == "helm crashed on spark" && !backtrace.is_empty()
        )),
        "{:?}",
        outcome.failures
    );
    assert!(outcome.failures.iter().any(|e| matches!(
        e,
        Error::ActionFailed { message, .. } if message.contains("helm rejected hdfs")
    )));
    assert!(matches!(
        outcome.error(),
        Some(Error::ApplyFailed { failed: 2, .. })
    ));
    assert_eq!(outcome.event_log.error_count(), 2);

    // everything except the two failed components made it, and the
    // post-process at the end still ran
    let missing: Vec<_> = desired
        .instances
        .values()
        .filter(|i| !outcome.actual_state.contains(&i.key))
        .map(|i| i.component.clone())
        .collect();
    assert_eq!(missing.len(), 2, "{missing:?}");
    assert!(missing.contains(&"spark".to_string()));
    assert!(missing.contains(&"hdfs".to_string()));
    assert!(calls.lock().contains(&"post-process cluster-eu".to_string()));

    // the next pass retries exactly what failed
    let retry = diff(&desired, &outcome.actual_state, Generation(2));
    let created: Vec<_> = retry
        .iter()
        .filter(|a| a.name().starts_with("component-create"))
        .collect();
    assert_eq!(created.len(), 2);
}

#[test]
fn emptied_policy_tears_everything_down() {
    let ext = external();
    let mut specs = BASELINE.to_vec();
    specs.push(ERIN_ANALYTICS);
    let old_policy = policy_with(&specs);
    let actual = resolve(&old_policy, &ext);
    let calls = Calls::default();
    let plugins = registry(&calls, None, None);

    let empty_policy = Policy::new();
    let desired = PolicyResolution::new();
    let actions = diff(&desired, &actual, Generation(7));
    let outcome = EngineApply::new(&empty_policy, &desired, &old_policy, &ext, &plugins)
        .apply(actual, &actions);

    assert!(outcome.is_success(), "{:?}", outcome.failures);
    assert!(outcome.actual_state.is_empty());
    assert!(outcome.actual_state.dependencies.is_empty());
    assert_eq!(
        calls.lock().iter().filter(|c| c.starts_with("destroy ")).count(),
        // kafka and zookeeper on three clusters, plus spark and hdfs
        3 * 2 + 2
    );
}
