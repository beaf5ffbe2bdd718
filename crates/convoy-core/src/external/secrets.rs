//! Secrets read from `secrets.toml` in a directory.
//!
//! ```toml
//! [[secret]]
//! user = "*"
//! values = { bigsecret = "bigsecretvalue" }
//!
//! [[secret]]
//! user = "1"
//! values = { appkey = "aliceappkey" }
//! ```
//!
//! Entries apply in file order; `*` matches every user.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use super::SecretLoader;
use crate::config::parser::enhance_toml_error;
use crate::lang::LabelSet;

pub const SECRETS_FILE: &str = "secrets.toml";

const ANY_USER: &str = "*";

#[derive(Debug, Clone, Deserialize)]
struct SecretEntry {
    user: String,
    #[serde(default)]
    values: LabelSet,
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    secret: Vec<SecretEntry>,
}

/// Secrets held in memory. The default instance has no secrets.
#[derive(Debug, Clone, Default)]
pub struct SecretDirectory {
    entries: Vec<SecretEntry>,
}

impl SecretDirectory {
    /// Load `secrets.toml` from `dir`; a missing file means no secrets.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(SECRETS_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No secrets file");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse secrets file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: SecretsFile =
            toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
        Ok(Self {
            entries: file.secret,
        })
    }
}

impl SecretLoader for SecretDirectory {
    fn load_secrets_by_user_id(&self, id: &str) -> Result<LabelSet> {
        let mut secrets = LabelSet::new();
        for entry in &self.entries {
            if entry.user == ANY_USER || entry.user == id {
                secrets.merge(&entry.values);
            }
        }
        Ok(secrets)
    }
}
