#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use convoy_core::external::{ExternalData, SecretDirectory, UserDirectory};
use convoy_core::lang::{Policy, PolicyObject, parse_policy_file, parse_policy_str};
use convoy_core::resolve::{PolicyResolution, resolve_all_dependencies};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_objects() -> Vec<PolicyObject> {
    parse_policy_file(&fixture("policy.toml")).unwrap()
}

pub fn external() -> ExternalData {
    let users = UserDirectory::from_file(&fixture("users.toml")).unwrap();
    ExternalData::new(Arc::new(users), Arc::new(SecretDirectory::default()))
}

/// `[[dependency]]` table for `user` consuming `contract`.
pub fn dependency(name: &str, user: &str, contract: &str) -> String {
    format!("[[dependency]]\nname = \"{name}\"\nuser = \"{user}\"\ncontract = \"{contract}\"\n\n")
}

pub fn dependency_objects(specs: &[(&str, &str, &str)]) -> Vec<PolicyObject> {
    let doc: String = specs
        .iter()
        .map(|(name, user, contract)| dependency(name, user, contract))
        .collect();
    parse_policy_str(&doc).unwrap()
}

/// Fixture policy plus the given dependencies.
pub fn policy_with(specs: &[(&str, &str, &str)]) -> Policy {
    let mut policy = Policy::new();
    for object in fixture_objects().into_iter().chain(dependency_objects(specs)) {
        policy.add_object(object).unwrap();
    }
    policy.validate().unwrap();
    policy
}

/// alice and bob on us-east, carol and dave on us-west, all consuming kafka.
pub const BASELINE: [(&str, &str, &str); 4] = [
    ("alice-kafka", "1", "kafka"),
    ("bob-kafka", "2", "kafka"),
    ("carol-kafka", "3", "kafka"),
    ("dave-kafka", "4", "kafka"),
];

pub const ERIN_ANALYTICS: (&str, &str, &str) = ("erin-analytics", "5", "analytics");

pub fn resolve(policy: &Policy, external: &ExternalData) -> PolicyResolution {
    let (resolution, log) = resolve_all_dependencies(policy, external).unwrap();
    assert_eq!(log.error_count(), 0, "{:?}", log.events());
    resolution
}
