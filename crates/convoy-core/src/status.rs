//! Status collection for the latest revision and the deployed instances.
//!
//! Endpoints come from the code plugin of every code instance in the actual
//! state. An instance whose plugin or cluster cannot be reached is reported
//! with an error instead of failing the whole report.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::context::AppContext;
use crate::error::Error;
use crate::lang::{Cluster, Policy};
use crate::plugin::PluginRegistry;
use crate::resolve::{ComponentInstance, ComponentInstanceKey};
use crate::store::{Revision, RevisionStatus};
use crate::types::Generation;

/// Overall system status
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub policy_generation: Generation,
    pub revision: Option<Revision>,
    pub summary: StatusSummary,
    pub endpoints: Vec<InstanceEndpoints>,
}

/// Summary counts for quick overview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub instances: usize,
    pub dependencies: usize,
    pub issues: usize,
}

/// Endpoints reported for one code instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceEndpoints {
    pub instance: ComponentInstanceKey,
    pub cluster: String,
    pub endpoints: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collect the status of everything the store knows about.
pub fn collect_status(ctx: &AppContext) -> Result<SystemStatus> {
    let store = ctx.store();
    let (policy, policy_generation) = store.get_policy(None).context("Failed to load policy")?;
    let revision = store.get_revision(None)?;
    let actual = store
        .get_actual_state()
        .context("Failed to load actual state")?;

    // instances may still sit on clusters only the applied policy has
    let applied = match store.get_last_successful_revision()? {
        Some(last) if last.policy_generation != policy_generation => {
            Some(store.get_policy(Some(last.policy_generation))?.0)
        }
        _ => None,
    };

    let plugins = ctx.plugin_registry();
    let endpoints: Vec<InstanceEndpoints> = actual
        .instances
        .values()
        .filter(|instance| instance.is_code())
        .map(|instance| {
            let cluster = find_cluster(&policy, applied.as_ref(), &instance.cluster);
            let (endpoints, error) = match instance_endpoints(&plugins, cluster, instance) {
                Ok(endpoints) => (endpoints, None),
                Err(err) => (BTreeMap::new(), Some(format!("{:#}", err))),
            };
            InstanceEndpoints {
                instance: instance.key.clone(),
                cluster: instance.cluster.clone(),
                endpoints,
                error,
            }
        })
        .collect();

    let revision_issues = revision
        .as_ref()
        .filter(|r| r.status == RevisionStatus::Error)
        .map_or(0, |r| r.errors.len().max(1));
    let summary = StatusSummary {
        instances: actual.len(),
        dependencies: actual.dependencies.len(),
        issues: revision_issues + endpoints.iter().filter(|e| e.error.is_some()).count(),
    };

    Ok(SystemStatus {
        policy_generation,
        revision,
        summary,
        endpoints,
    })
}

fn find_cluster<'a>(
    policy: &'a Policy,
    applied: Option<&'a Policy>,
    name: &str,
) -> Option<&'a Cluster> {
    policy
        .cluster(name)
        .or_else(|| applied.and_then(|p| p.cluster(name)))
}

fn instance_endpoints(
    plugins: &PluginRegistry,
    cluster: Option<&Cluster>,
    instance: &ComponentInstance,
) -> Result<BTreeMap<String, String>> {
    let Some(code) = &instance.code else {
        return Ok(BTreeMap::new());
    };
    let cluster = cluster.ok_or_else(|| Error::ClusterNotFound {
        cluster: instance.cluster.clone(),
    })?;
    plugins
        .code_plugin(cluster.cluster_type, code.code_type)?
        .endpoints(cluster, instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ExternalData, User};
    use crate::lang::{ClusterType, CodeType, LabelSet, parse_policy_str};
    use crate::plugin::CodePlugin;
    use crate::resolve::resolve_all_dependencies;
    use crate::store::{LocalStore, Store};
    use std::sync::Arc;
    use std::time::Duration;

    const POLICY: &str = r#"
        [[cluster]]
        namespace = "system"
        name = "local"
        type = "kubernetes"

        [[service]]
        name = "web"
        cluster = "local"

        [[service.component]]
        name = "server"
        code = { type = "raw", params = { image = "web:1" } }

        [[contract]]
        name = "web"

        [[contract.context]]
        name = "default"
        allocation = { service = "web" }

        [[dependency]]
        name = "site"
        user = "1"
        contract = "web"
    "#;

    #[derive(Debug)]
    struct ReportingRaw;

    impl CodePlugin for ReportingRaw {
        fn cluster_type(&self) -> ClusterType {
            ClusterType::Kubernetes
        }

        fn code_type(&self) -> CodeType {
            CodeType::Raw
        }

        fn create(&self, _cluster: &Cluster, _instance: &ComponentInstance) -> Result<()> {
            Ok(())
        }

        fn update(&self, _cluster: &Cluster, _instance: &ComponentInstance) -> Result<()> {
            Ok(())
        }

        fn destroy(&self, _cluster: &Cluster, _instance: &ComponentInstance) -> Result<()> {
            Ok(())
        }

        fn endpoints(
            &self,
            cluster: &Cluster,
            instance: &ComponentInstance,
        ) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::from([(
                "http".to_string(),
                format!("http://{}.{}", instance.component, cluster.metadata.name),
            )]))
        }
    }

    /// Context over a store whose actual state matches `POLICY`.
    fn deployed() -> AppContext {
        let store = Arc::new(LocalStore::in_memory());
        store
            .update_policy(parse_policy_str(POLICY).unwrap(), Vec::new(), "admin")
            .unwrap();
        let external = ExternalData::from_users([User::new("1", "alice", LabelSet::new())]);
        let (policy, _) = store.get_policy(None).unwrap();
        let (actual, _) = resolve_all_dependencies(&policy, &external).unwrap();
        store.save_actual_state(&actual).unwrap();

        AppContext::new(store, external, Duration::ZERO).with_plugins(|| {
            let mut plugins = PluginRegistry::with_noop_plugins(Duration::ZERO);
            plugins.register_code(Box::new(ReportingRaw));
            plugins
        })
    }

    #[test]
    fn test_status_reports_plugin_endpoints() {
        let status = collect_status(&deployed()).unwrap();

        assert_eq!(status.policy_generation, Generation(1));
        assert!(status.revision.is_none());
        assert_eq!(
            status.summary,
            StatusSummary {
                instances: 2,
                dependencies: 1,
                issues: 0
            }
        );
        assert_eq!(status.endpoints.len(), 1);
        assert_eq!(status.endpoints[0].endpoints["http"], "http://server.local");
        assert!(status.endpoints[0].error.is_none());
    }

    #[test]
    fn test_unknown_cluster_is_an_issue_not_a_failure() {
        let ctx = deployed();
        let cluster = "system/cluster/local".parse().unwrap();
        ctx.store()
            .update_policy(Vec::new(), vec![cluster], "admin")
            .unwrap();

        let status = collect_status(&ctx).unwrap();
        assert_eq!(status.summary.issues, 1);
        let error = status.endpoints[0].error.as_deref().unwrap();
        assert!(error.contains("local"), "{error}");
        assert!(status.endpoints[0].endpoints.is_empty());
    }
}
