//! Server configuration.
//!
//! Everything the process needs is read from one explicit TOML file and
//! threaded into the store, external data and enforcer constructors.

pub mod parser;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use parser::{parse_server_config, parse_server_config_str};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub enforcer: EnforcerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file; in-memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Revisions kept besides the latest successful one
    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,
}

fn default_max_revisions() -> usize {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_revisions: default_max_revisions(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersConfig {
    /// User directories, consulted in order
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// User IDs always treated as domain admins
    #[serde(default)]
    pub domain_admin_overrides: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Per-call delay of the built-in no-op plugins
    #[serde(default)]
    pub noop_sleep_ms: u64,
}

fn default_interval_secs() -> u64 {
    5
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            interval_secs: default_interval_secs(),
            noop_sleep_ms: 0,
        }
    }
}

impl EnforcerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn noop_sleep(&self) -> Duration {
        Duration::from_millis(self.noop_sleep_ms)
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enforcer.interval_secs == 0 {
            bail!("enforcer.interval_secs must be greater than zero");
        }
        if self.store.max_revisions == 0 {
            bail!("store.max_revisions must be greater than zero");
        }
        if let Some(file) = self.users.files.iter().find(|f| f.as_os_str().is_empty()) {
            bail!("users.files contains an empty path: {:?}", file);
        }
        if self.users.domain_admin_overrides.iter().any(|id| id.trim().is_empty()) {
            bail!("users.domain_admin_overrides contains an empty user ID");
        }
        Ok(())
    }

    /// Make relative paths absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(path) = self.store.path.as_mut() {
            resolve(path);
        }
        self.users.files.iter_mut().for_each(resolve);
        if let Some(dir) = self.secrets.dir.as_mut() {
            resolve(dir);
        }
    }

    /// Default snapshot location under the user state directory.
    pub fn default_store_path() -> Result<PathBuf> {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?;
        Ok(base.join("convoy").join("store.json"))
    }
}
