//! Policy updates and enforcement passes against a store.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tokio::sync::oneshot;

use convoy_core::Error;
use convoy_core::apply::ActionKind;
use convoy_core::context::AppContext;
use convoy_core::enforcer::Enforcer;
use convoy_core::external::{ExternalData, MultiSourceUserLoader, SecretDirectory, UserDirectory};
use convoy_core::lang::{
    Cluster, ClusterType, CodeType, ObjectKey, Policy, PolicyObject, parse_policy_str,
};
use convoy_core::plugin::{CodePlugin, PluginRegistry};
use convoy_core::resolve::{ComponentInstance, ComponentInstanceKey, PolicyResolution};
use convoy_core::store::{LocalStore, Revision, RevisionStatus, Store, StoreLock};
use convoy_core::types::Generation;

use support::{BASELINE, dependency_objects, fixture, fixture_objects};

const ROOT: &str = "7";
const ALICE: &str = "1";

fn external() -> ExternalData {
    let users = MultiSourceUserLoader::new()
        .with_loader(Arc::new(UserDirectory::from_file(&fixture("users.toml")).unwrap()))
        .with_domain_admin_overrides([ROOT.to_string()]);
    ExternalData::new(Arc::new(users), Arc::new(SecretDirectory::default()))
}

fn enforcer(store: Arc<dyn Store>) -> Enforcer {
    Enforcer::new(AppContext::new(store, external(), Duration::ZERO))
}

fn baseline_objects() -> Vec<PolicyObject> {
    let mut objects = fixture_objects();
    objects.extend(dependency_objects(&BASELINE));
    objects
}

/// Helm plugin whose destroy fails while `failures` is above zero.
#[derive(Debug)]
struct FlakyHelm {
    failures: Arc<AtomicUsize>,
}

impl CodePlugin for FlakyHelm {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Kubernetes
    }

    fn code_type(&self) -> CodeType {
        CodeType::Helm
    }

    fn create(&self, _cluster: &Cluster, _instance: &ComponentInstance) -> Result<()> {
        Ok(())
    }

    fn update(&self, _cluster: &Cluster, _instance: &ComponentInstance) -> Result<()> {
        Ok(())
    }

    fn destroy(&self, _cluster: &Cluster, instance: &ComponentInstance) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("helm timed out deleting {}", instance.key);
        }
        Ok(())
    }

    fn endpoints(
        &self,
        _cluster: &Cluster,
        _instance: &ComponentInstance,
    ) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

fn flaky_enforcer(store: Arc<dyn Store>, failures: &Arc<AtomicUsize>) -> Enforcer {
    let failures = failures.clone();
    let ctx = AppContext::new(store, external(), Duration::ZERO).with_plugins(move || {
        let mut plugins = PluginRegistry::with_noop_plugins(Duration::ZERO);
        plugins.register_code(Box::new(FlakyHelm {
            failures: failures.clone(),
        }));
        plugins
    });
    Enforcer::new(ctx)
}

/// Store whose next `get_policy` fails once armed.
#[derive(Debug)]
struct FlakyStore {
    inner: LocalStore,
    armed: AtomicUsize,
    served: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            armed: AtomicUsize::new(0),
            served: AtomicUsize::new(0),
        }
    }

    fn fail_next_get_policy(&self) {
        self.armed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Store for FlakyStore {
    fn lock_pass(&self) -> Result<StoreLock> {
        self.inner.lock_pass()
    }

    fn get_policy(&self, generation: Option<Generation>) -> Result<(Policy, Generation)> {
        if self
            .armed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.served.fetch_add(1, Ordering::SeqCst);
            bail!("store unavailable");
        }
        self.inner.get_policy(generation)
    }

    fn update_policy(
        &self,
        updated: Vec<PolicyObject>,
        deleted: Vec<ObjectKey>,
        author: &str,
    ) -> Result<(bool, Generation)> {
        self.inner.update_policy(updated, deleted, author)
    }

    fn get_actual_state(&self) -> Result<PolicyResolution> {
        self.inner.get_actual_state()
    }

    fn save_actual_state(&self, state: &PolicyResolution) -> Result<()> {
        self.inner.save_actual_state(state)
    }

    fn new_revision(&self, policy_generation: Generation) -> Result<Revision> {
        self.inner.new_revision(policy_generation)
    }

    fn save_revision(&self, revision: &Revision) -> Result<()> {
        self.inner.save_revision(revision)
    }

    fn get_revision(&self, generation: Option<Generation>) -> Result<Option<Revision>> {
        self.inner.get_revision(generation)
    }

    fn get_last_successful_revision(&self) -> Result<Option<Revision>> {
        self.inner.get_last_successful_revision()
    }
}

#[tokio::test]
async fn bootstrap_then_enforce_until_converged() {
    let enforcer = enforcer(Arc::new(LocalStore::in_memory()));

    let update = enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    assert!(update.changed);
    assert_eq!(update.policy_generation, Generation(1));
    // 8 creates, 4 attaches, 2 post-process
    assert_eq!(update.actions.len(), 14);

    let first = enforcer.enforce().await.unwrap();
    assert_eq!(first.revision, Some(Generation(1)));
    assert_eq!(first.failed, 0);
    assert_eq!(first.summary.count(ActionKind::ComponentCreate), 8);

    let second = enforcer.enforce().await.unwrap();
    assert_eq!(second.revision, None);
    assert!(second.summary.is_empty());

    let store = enforcer.context().store();
    let revision = store.get_revision(None).unwrap().unwrap();
    assert_eq!(revision.status, RevisionStatus::Success);
    assert_eq!(revision.progress.current, revision.progress.total);
    assert_eq!(store.get_actual_state().unwrap().len(), 8);
}

#[tokio::test]
async fn resubmitting_the_same_objects_keeps_the_generation() {
    let enforcer = enforcer(Arc::new(LocalStore::in_memory()));
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();

    let again = enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    assert!(!again.changed);
    assert_eq!(again.policy_generation, Generation(1));
}

#[tokio::test]
async fn consumer_cannot_add_clusters() {
    let enforcer = enforcer(Arc::new(LocalStore::in_memory()));
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();

    let cluster = parse_policy_str(
        r#"
        [[cluster]]
        namespace = "system"
        name = "cluster-rogue"
        type = "kubernetes"
        "#,
    )
    .unwrap();
    let err = enforcer
        .update_policy(cluster, Vec::new(), ALICE)
        .await
        .unwrap_err();
    assert!(
        matches!(err.downcast_ref::<Error>(), Some(Error::AccessDenied { user, .. }) if user == "alice"),
        "{err:#}"
    );

    let (_, generation) = enforcer.context().store().get_policy(None).unwrap();
    assert_eq!(generation, Generation(1));
}

#[tokio::test]
async fn consumer_dependency_reuses_shared_instances() {
    let enforcer = enforcer(Arc::new(LocalStore::in_memory()));
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    enforcer.enforce().await.unwrap();

    let update = enforcer
        .update_policy(
            dependency_objects(&[("alice-extra", ALICE, "kafka")]),
            Vec::new(),
            ALICE,
        )
        .await
        .unwrap();
    assert!(update.changed);
    assert_eq!(update.actions.len(), 1, "{:?}", update.actions);
    assert!(update.actions[0].starts_with("dependency-attach main/alice-extra -> "));
}

#[tokio::test]
async fn deleting_one_of_two_consumers_only_detaches() {
    let enforcer = enforcer(Arc::new(LocalStore::in_memory()));
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    enforcer.enforce().await.unwrap();

    let dave: ObjectKey = "main/dependency/dave-kafka".parse().unwrap();
    let update = enforcer
        .update_policy(Vec::new(), vec![dave], ROOT)
        .await
        .unwrap();
    assert_eq!(update.policy_generation, Generation(2));
    assert_eq!(update.actions.len(), 1, "{:?}", update.actions);
    assert!(update.actions[0].starts_with("dependency-detach main/dave-kafka -> "));

    let outcome = enforcer.enforce().await.unwrap();
    assert_eq!(outcome.revision, Some(Generation(2)));
    let actual = enforcer.context().store().get_actual_state().unwrap();
    assert_eq!(actual.len(), 8);
    assert!(!actual.dependencies.contains_key("main/dave-kafka"));
}

#[tokio::test]
async fn store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let enforcer = enforcer(Arc::new(LocalStore::open(&path).unwrap()));
        enforcer
            .update_policy(baseline_objects(), Vec::new(), ROOT)
            .await
            .unwrap();
        enforcer.enforce().await.unwrap();
    }

    let reopened = enforcer(Arc::new(LocalStore::open(&path).unwrap()));
    let store = reopened.context().store();
    let (policy, generation) = store.get_policy(None).unwrap();
    assert_eq!(generation, Generation(1));
    assert_eq!(policy.objects().len(), baseline_objects().len());
    assert_eq!(store.get_actual_state().unwrap().len(), 8);

    let outcome = reopened.enforce().await.unwrap();
    assert_eq!(outcome.revision, None);
}

#[tokio::test]
async fn retried_plan_reuses_the_failed_revision() {
    let store: Arc<dyn Store> = Arc::new(LocalStore::in_memory());
    let enforcer = enforcer(store.clone());
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    enforcer.enforce().await.unwrap();

    // an instance on a cluster no policy knows about can never be deleted
    let mut actual = store.get_actual_state().unwrap();
    let mut orphan = actual
        .instances
        .values()
        .find(|i| i.is_code())
        .cloned()
        .unwrap();
    orphan.key = ComponentInstanceKey::from("cluster-gone#main#kafka#production#kafka#kafka");
    orphan.cluster = "cluster-gone".to_string();
    orphan.depends_on.clear();
    orphan.dependents.clear();
    orphan.dependencies.clear();
    actual.instances.insert(orphan.key.clone(), orphan);
    store.save_actual_state(&actual).unwrap();

    let mut revisions = Vec::new();
    for _ in 0..4 {
        let outcome = enforcer.enforce().await.unwrap();
        assert_eq!(outcome.failed, 2, "{outcome:?}");
        revisions.push(outcome.revision);
    }
    assert_eq!(revisions, vec![Some(Generation(2)); 4]);

    let latest = store.get_revision(None).unwrap().unwrap();
    assert_eq!(latest.generation, Generation(2));
    assert_eq!(latest.attempts, 4);
    assert_eq!(latest.status, RevisionStatus::Error);
    assert!(store.get_revision(Some(Generation(3))).unwrap().is_none());
    assert_eq!(
        store.get_last_successful_revision().unwrap().map(|r| r.generation),
        Some(Generation(1))
    );
}

#[tokio::test]
async fn removed_cluster_stays_reachable_after_a_failed_teardown() {
    let failures = Arc::new(AtomicUsize::new(0));
    let store: Arc<dyn Store> = Arc::new(LocalStore::in_memory());
    let enforcer = flaky_enforcer(store.clone(), &failures);
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    assert_eq!(enforcer.enforce().await.unwrap().failed, 0);

    // empty us-east and remove the cluster itself
    let deleted: Vec<ObjectKey> = [
        "main/dependency/alice-kafka",
        "main/dependency/bob-kafka",
        "system/cluster/cluster-us-east",
    ]
    .iter()
    .map(|k| k.parse().unwrap())
    .collect();
    enforcer
        .update_policy(Vec::new(), deleted, ROOT)
        .await
        .unwrap();

    failures.store(1, Ordering::SeqCst);
    let interrupted = enforcer.enforce().await.unwrap();
    assert_eq!(interrupted.failed, 1, "{interrupted:?}");
    assert_eq!(
        store.get_revision(None).unwrap().unwrap().status,
        RevisionStatus::Error
    );

    let finished = enforcer.enforce().await.unwrap();
    assert_eq!(finished.failed, 0, "{finished:?}");
    let actual = store.get_actual_state().unwrap();
    assert_eq!(actual.len(), 4);
    assert!(actual.instances.values().all(|i| i.cluster != "cluster-us-east"));
    assert_eq!(enforcer.enforce().await.unwrap().revision, None);
}

#[tokio::test(start_paused = true)]
async fn run_loop_retries_after_a_failed_pass_and_stops_on_shutdown() {
    let store = Arc::new(FlakyStore::new(LocalStore::in_memory()));
    let enforcer = enforcer(store.clone());
    enforcer
        .update_policy(baseline_objects(), Vec::new(), ROOT)
        .await
        .unwrap();
    store.fail_next_get_policy();

    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn({
        let enforcer = enforcer.clone();
        async move {
            enforcer
                .run(Duration::from_secs(5), async {
                    let _ = stopped.await;
                })
                .await
        }
    });

    let deadline = Instant::now() + Duration::from_secs(30);
    let converged = loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let revision = store.get_revision(None).unwrap();
        if revision.is_some_and(|r| r.status == RevisionStatus::Success) {
            break true;
        }
        if Instant::now() > deadline {
            break false;
        }
    };
    assert!(converged, "no successful pass after the failed one");
    assert_eq!(store.served.load(Ordering::SeqCst), 1);
    assert_eq!(store.get_actual_state().unwrap().len(), 8);

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(60), running)
        .await
        .expect("run did not stop after shutdown")
        .unwrap();
}
