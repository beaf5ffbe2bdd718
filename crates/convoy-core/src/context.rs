//! Application context shared by the enforcer and policy updates.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ServerConfig;
use crate::external::{ExternalData, MultiSourceUserLoader, SecretDirectory, UserDirectory};
use crate::plugin::PluginRegistry;
use crate::store::{LocalStore, Store};

/// Builds the plugin registry for one pass.
pub type PluginFactory = Arc<dyn Fn() -> PluginRegistry + Send + Sync>;

/// Store, external data and plugins wired from one config.
///
/// Cheap to clone; the enforcer moves a clone into each blocking pass.
#[derive(Clone)]
pub struct AppContext {
    store: Arc<dyn Store>,
    external: ExternalData,
    plugins: PluginFactory,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("store", &self.store)
            .field("external", &self.external)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Context using the no-op plugins, sleeping `noop_sleep` per call.
    pub fn new(store: Arc<dyn Store>, external: ExternalData, noop_sleep: Duration) -> Self {
        Self {
            store,
            external,
            plugins: Arc::new(move || PluginRegistry::with_noop_plugins(noop_sleep)),
        }
    }

    /// Replace the plugins every later pass is run with.
    pub fn with_plugins(
        mut self,
        factory: impl Fn() -> PluginRegistry + Send + Sync + 'static,
    ) -> Self {
        self.plugins = Arc::new(factory);
        self
    }

    /// Build every collaborator named by `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let store = match &config.store.path {
            Some(path) => LocalStore::open(path)
                .with_context(|| format!("Failed to open store: {}", path.display()))?,
            None => LocalStore::in_memory(),
        };
        let store: Arc<dyn Store> = Arc::new(store.with_max_revisions(config.store.max_revisions));

        let mut users = MultiSourceUserLoader::new()
            .with_domain_admin_overrides(config.users.domain_admin_overrides.iter().cloned());
        for file in &config.users.files {
            let directory = UserDirectory::from_file(file)
                .with_context(|| format!("Failed to load users: {}", file.display()))?;
            info!(file = %file.display(), users = directory.len(), "Loaded users");
            users = users.with_loader(Arc::new(directory));
        }

        let secrets = match &config.secrets.dir {
            Some(dir) => SecretDirectory::from_dir(dir)
                .with_context(|| format!("Failed to load secrets: {}", dir.display()))?,
            None => SecretDirectory::default(),
        };

        Ok(Self::new(
            store,
            ExternalData::new(Arc::new(users), Arc::new(secrets)),
            config.enforcer.noop_sleep(),
        ))
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn external(&self) -> &ExternalData {
        &self.external
    }

    /// Build a fresh plugin registry for one pass.
    pub fn plugin_registry(&self) -> PluginRegistry {
        (self.plugins)()
    }
}
