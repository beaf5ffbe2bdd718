//! Access control: which users may change which parts of the policy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::{Criteria, Kind, Metadata, Policy, PolicyObject};
use crate::error::{Error, Result};
use crate::eval::{EvalCache, Param, Params};
use crate::external::User;

/// Grants roles to users whose labels match the criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default)]
    pub weight: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    #[serde(default)]
    pub actions: AclRuleActions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRuleActions {
    /// Role name -> comma-separated namespaces, or `*` for all
    #[serde(default, rename = "add-role")]
    pub add_role: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    ServiceConsumer,
    NamespaceAdmin,
    DomainAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ServiceConsumer => "service-consumer",
            Role::NamespaceAdmin => "namespace-admin",
            Role::DomainAdmin => "domain-admin",
        }
    }

    fn can_manage(&self, kind: Kind) -> bool {
        match self {
            Role::DomainAdmin => true,
            Role::NamespaceAdmin => !matches!(kind, Kind::Cluster | Kind::AclRule),
            Role::ServiceConsumer => kind == Kind::Dependency,
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service-consumer" => Ok(Role::ServiceConsumer),
            "namespace-admin" => Ok(Role::NamespaceAdmin),
            "domain-admin" => Ok(Role::DomainAdmin),
            other => Err(Error::validation(format!("unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaces a role applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum NamespaceSet {
    #[default]
    None,
    All,
    Some(BTreeSet<String>),
}

impl NamespaceSet {
    fn add(&mut self, spec: &str) {
        for ns in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if ns == "*" {
                *self = NamespaceSet::All;
                return;
            }
            match self {
                NamespaceSet::All => return,
                NamespaceSet::None => *self = NamespaceSet::Some(BTreeSet::from([ns.to_string()])),
                NamespaceSet::Some(set) => {
                    set.insert(ns.to_string());
                }
            }
        }
    }

    fn contains(&self, namespace: &str) -> bool {
        match self {
            NamespaceSet::None => false,
            NamespaceSet::All => true,
            NamespaceSet::Some(set) => set.contains(namespace),
        }
    }
}

/// Roles granted to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Privileges {
    roles: BTreeMap<Role, NamespaceSet>,
}

impl Privileges {
    /// Evaluate ACL rules for a user, in weight order.
    pub fn for_user(policy: &Policy, user: &User, mut cache: Option<&mut EvalCache>) -> Result<Self> {
        let mut privileges = Self::default();
        if user.domain_admin {
            privileges.grant(Role::DomainAdmin, "*");
            return Ok(privileges);
        }

        let mut params = Params::with_labels(&user.labels);
        params.insert(
            "user",
            Param::map()
                .with_str("id", &user.id)
                .with_str("name", &user.name)
                .with("labels", (&user.labels).into()),
        );

        for rule in policy.acl_rules() {
            let matched = super::criteria::criteria_allows(
                rule.criteria.as_ref(),
                &params,
                cache.as_deref_mut(),
            )?;
            if !matched {
                continue;
            }
            for (role, namespaces) in &rule.actions.add_role {
                privileges.grant(role.parse()?, namespaces);
            }
        }
        Ok(privileges)
    }

    pub fn grant(&mut self, role: Role, namespaces: &str) {
        self.roles.entry(role).or_default().add(namespaces);
    }

    pub fn has_role(&self, role: Role, namespace: &str) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|set| set.contains(namespace))
    }

    pub fn can_manage(&self, kind: Kind, namespace: &str) -> bool {
        self.roles
            .iter()
            .any(|(role, set)| set.contains(namespace) && role.can_manage(kind))
    }
}

/// A policy as seen by one user.
pub struct PolicyView<'a> {
    policy: &'a Policy,
    user: &'a User,
    privileges: Privileges,
}

impl<'a> PolicyView<'a> {
    pub fn new(policy: &'a Policy, user: &'a User) -> Result<Self> {
        let privileges = Privileges::for_user(policy, user, None)?;
        Ok(Self {
            policy,
            user,
            privileges,
        })
    }

    pub fn policy(&self) -> &Policy {
        self.policy
    }

    pub fn privileges(&self) -> &Privileges {
        &self.privileges
    }

    /// Check that the user may add, change or delete the object.
    pub fn manage_object(&self, object: &PolicyObject) -> Result<()> {
        let metadata = object.metadata();
        if self.privileges.can_manage(object.kind(), &metadata.namespace) {
            Ok(())
        } else {
            Err(Error::AccessDenied {
                user: self.user.name.clone(),
                object: object.key().to_string(),
            })
        }
    }
}
