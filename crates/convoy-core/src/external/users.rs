//! User loaders backed by TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use super::{User, UserLoader};
use crate::config::parser::enhance_toml_error;

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    user: Vec<User>,
}

/// Users loaded once into memory, keyed by ID.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: BTreeMap<String, User>,
}

impl UserDirectory {
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }

    /// Parse a `[[user]]` document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: UsersFile =
            toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

        let mut seen = HashSet::new();
        for user in &file.user {
            if !seen.insert(user.id.as_str()) {
                anyhow::bail!("Duplicate user id '{}'", user.id);
            }
        }
        Ok(Self::from_users(file.user))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read users file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse users file: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserLoader for UserDirectory {
    fn load_user_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.get(id).cloned())
    }

    fn load_users(&self) -> Result<Vec<User>> {
        Ok(self.users.values().cloned().collect())
    }
}

/// Chains several loaders; the first one that knows a user wins.
///
/// Users listed in the domain admin overrides are always domain admins.
#[derive(Debug, Clone, Default)]
pub struct MultiSourceUserLoader {
    loaders: Vec<Arc<dyn UserLoader>>,
    domain_admin_overrides: HashSet<String>,
}

impl MultiSourceUserLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, loader: Arc<dyn UserLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_domain_admin_overrides(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.domain_admin_overrides.extend(ids);
        self
    }

    fn apply_overrides(&self, mut user: User) -> User {
        if self.domain_admin_overrides.contains(&user.id) {
            user.domain_admin = true;
        }
        user
    }
}

impl UserLoader for MultiSourceUserLoader {
    fn load_user_by_id(&self, id: &str) -> Result<Option<User>> {
        for loader in &self.loaders {
            if let Some(user) = loader.load_user_by_id(id)? {
                return Ok(Some(self.apply_overrides(user)));
            }
        }
        Ok(None)
    }

    fn load_users(&self) -> Result<Vec<User>> {
        let mut users: BTreeMap<String, User> = BTreeMap::new();
        for loader in &self.loaders {
            for user in loader.load_users()? {
                users.entry(user.id.clone()).or_insert(user);
            }
        }
        Ok(users
            .into_values()
            .map(|u| self.apply_overrides(u))
            .collect())
    }
}
