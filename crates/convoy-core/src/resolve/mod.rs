//! Policy resolution.
//!
//! Turns dependencies, contracts and rules into a [`PolicyResolution`]: an
//! acyclic graph of component instances bound to clusters, plus the root
//! instance every resolved dependency maps to.

pub mod key;
mod params;
pub mod resolution;
pub mod resolver;

pub use key::{ComponentInstanceKey, KeyParts, ROOT_COMPONENT};
pub use resolution::{ComponentInstance, PolicyResolution, ResolvedCode};
pub use resolver::PolicyResolver;

use crate::error::Result;
use crate::event::EventLog;
use crate::external::ExternalData;
use crate::lang::Policy;

/// Resolve every dependency of `policy`.
pub fn resolve_all_dependencies(
    policy: &Policy,
    external: &ExternalData,
) -> Result<(PolicyResolution, EventLog)> {
    PolicyResolver::new(policy, external).resolve_all_dependencies()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::external::User;
    use crate::lang::{LabelSet, parse_policy_str};

    const BASE: &str = r#"
        [[cluster]]
        namespace = "system"
        name = "local"
        type = "kubernetes"

        [[service]]
        name = "db"
        cluster = "local"

        [[service.component]]
        name = "server"
        code = { type = "raw", params = { owner = "{{.User.Name}}" } }

        [[contract]]
        name = "db"

        [[contract.context]]
        name = "default"
        allocation = { service = "db", keys = ["{{.Labels.team}}"] }
    "#;

    fn policy(extra: &str) -> Policy {
        let mut policy = Policy::new();
        for object in parse_policy_str(&format!("{BASE}\n{extra}")).unwrap() {
            policy.add_object(object).unwrap();
        }
        policy
    }

    fn external() -> ExternalData {
        ExternalData::from_users([
            User::new("1", "alice", LabelSet::from_pairs([("team", "a")])),
            User::new("2", "bob", LabelSet::from_pairs([("team", "b")])),
            User::new("3", "carol", LabelSet::from_pairs([("team", "a")])),
        ])
    }

    fn dependency(name: &str, user: &str, contract: &str) -> String {
        format!(
            "[[dependency]]\nname = \"{name}\"\nuser = \"{user}\"\ncontract = \"{contract}\"\n"
        )
    }

    #[test]
    fn test_keys_split_and_share_instances() {
        let deps = [
            dependency("d1", "1", "db"),
            dependency("d2", "2", "db"),
            dependency("d3", "3", "db"),
        ]
        .join("\n");
        let (resolution, log) = resolve_all_dependencies(&policy(&deps), &external()).unwrap();

        // team a (shared by alice and carol) and team b, each root + server
        assert_eq!(resolution.len(), 4);
        assert_eq!(resolution.dependencies.len(), 3);
        assert_eq!(
            resolution.dependencies["main/d1"],
            resolution.dependencies["main/d3"]
        );
        assert_eq!(log.error_count(), 0);

        let shared = &resolution.instances[&resolution.dependencies["main/d1"]];
        assert_eq!(shared.dependencies.len(), 2);
        // first resolution wins for rendered params
        let server = shared.depends_on.iter().next().unwrap();
        let code = resolution.instances[server].code.as_ref().unwrap();
        assert_eq!(code.params["owner"], "alice");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let deps = [dependency("d2", "2", "db"), dependency("d1", "1", "db")].join("\n");
        let policy = policy(&deps);
        let (first, _) = resolve_all_dependencies(&policy, &external()).unwrap();
        let (second, _) = PolicyResolver::new(&policy, &external())
            .without_cache()
            .resolve_all_dependencies()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_user_isolated() {
        let deps = [dependency("d1", "1", "db"), dependency("ghost", "99", "db")].join("\n");
        let (resolution, log) = resolve_all_dependencies(&policy(&deps), &external()).unwrap();
        assert_eq!(resolution.dependencies.len(), 1);
        assert_eq!(log.error_count(), 1);
    }

    #[test]
    fn test_rule_rejects_dependency() {
        let extra = format!(
            "{}\n{}",
            dependency("d1", "1", "db"),
            r#"
            [[rule]]
            name = "no-team-b"
            weight = 10
            criteria = { require-all = ["team == 'b'"] }
            actions = { reject = true }
            "#
        ) + &dependency("d2", "2", "db");
        let (resolution, log) = resolve_all_dependencies(&policy(&extra), &external()).unwrap();

        assert!(resolution.dependencies.contains_key("main/d1"));
        assert!(!resolution.dependencies.contains_key("main/d2"));
        assert!(
            log.events()
                .iter()
                .any(|e| e.message.contains("rejected by rule 'main/no-team-b'"))
        );
    }

    #[test]
    fn test_rule_changes_labels() {
        let extra = format!(
            "{}\n{}",
            dependency("d1", "1", "db"),
            r#"
            [[rule]]
            name = "everyone-in-one-team"
            actions = { change-labels = { set = { team = "shared" } } }
            "#
        );
        let (resolution, _) = resolve_all_dependencies(&policy(&extra), &external()).unwrap();
        let root = &resolution.dependencies["main/d1"];
        assert_eq!(resolution.instances[root].allocation_keys, vec!["shared"]);
    }

    #[test]
    fn test_cyclic_composition_detected() {
        let extra = r#"
            [[service]]
            name = "ouroboros"
            cluster = "local"

            [[service.component]]
            name = "self"
            contract = "ouroboros"

            [[contract]]
            name = "ouroboros"

            [[contract.context]]
            name = "default"
            allocation = { service = "ouroboros" }
        "#
        .to_string()
            + &dependency("loop", "1", "ouroboros")
            + &dependency("ok", "2", "db");

        let (resolution, log) = resolve_all_dependencies(&policy(&extra), &external()).unwrap();
        assert_eq!(resolution.dependencies.len(), 1);
        assert!(resolution.dependencies.contains_key("main/ok"));
        // failed branch rolled back
        assert!(resolution.instances.keys().all(|k| !k.as_str().contains("ouroboros")));
        assert!(
            log.events()
                .iter()
                .any(|e| e.message.contains("cyclic dependency"))
        );
    }

    #[test]
    fn test_missing_cluster_is_dependency_scoped() {
        let extra = r#"
            [[service]]
            name = "floating"

            [[service.component]]
            name = "c"
            code = { type = "raw" }

            [[contract]]
            name = "floating"

            [[contract.context]]
            name = "default"
            allocation = { service = "floating" }
        "#
        .to_string()
            + &dependency("d1", "1", "floating");
        let (resolution, log) = resolve_all_dependencies(&policy(&extra), &external()).unwrap();
        assert!(resolution.is_empty());
        assert_eq!(log.error_count(), 1);
        assert!(Error::MissingCluster { service: "floating".into() }.is_dependency_scoped());
    }

    #[test]
    fn test_template_error_is_dependency_scoped() {
        let extra = BASE.replace("{{.Labels.team}}", "{{.Labels.missing}}");
        let mut policy = Policy::new();
        for object in parse_policy_str(&(extra + &dependency("d1", "1", "db"))).unwrap() {
            policy.add_object(object).unwrap();
        }
        let (resolution, log) = resolve_all_dependencies(&policy, &external()).unwrap();
        assert!(resolution.dependencies.is_empty());
        assert_eq!(log.error_count(), 1);
    }
}
