//! External data: users and their secrets.
//!
//! The resolver treats both as plain label providers. Loaders are
//! collaborators and report failures with `anyhow`; [`ExternalData`] converts
//! them into pipeline errors.

pub mod secrets;
pub mod users;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::lang::LabelSet;

pub use secrets::SecretDirectory;
pub use users::{MultiSourceUserLoader, UserDirectory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,

    /// Grants the domain admin role regardless of ACL rules
    #[serde(default, rename = "domain-admin")]
    pub domain_admin: bool,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels,
            domain_admin: false,
        }
    }
}

/// Source of users by ID.
pub trait UserLoader: Send + Sync + fmt::Debug {
    /// Returns `Ok(None)` when the user is unknown.
    fn load_user_by_id(&self, id: &str) -> anyhow::Result<Option<User>>;

    fn load_users(&self) -> anyhow::Result<Vec<User>>;
}

/// Source of per-user secrets.
pub trait SecretLoader: Send + Sync + fmt::Debug {
    fn load_secrets_by_user_id(&self, id: &str) -> anyhow::Result<LabelSet>;
}

/// Loaders handed to the resolver and to actions.
#[derive(Debug, Clone)]
pub struct ExternalData {
    users: Arc<dyn UserLoader>,
    secrets: Arc<dyn SecretLoader>,
}

impl ExternalData {
    pub fn new(users: Arc<dyn UserLoader>, secrets: Arc<dyn SecretLoader>) -> Self {
        Self { users, secrets }
    }

    /// In-memory users and no secrets.
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        Self::new(
            Arc::new(UserDirectory::from_users(users)),
            Arc::new(SecretDirectory::default()),
        )
    }

    pub fn user_loader(&self) -> &dyn UserLoader {
        self.users.as_ref()
    }

    pub fn user(&self, id: &str) -> Result<User> {
        self.users
            .load_user_by_id(id)
            .map_err(Error::External)?
            .ok_or_else(|| Error::UserNotFound { id: id.to_string() })
    }

    pub fn secrets(&self, user_id: &str) -> Result<LabelSet> {
        self.secrets
            .load_secrets_by_user_id(user_id)
            .map_err(Error::External)
    }
}
