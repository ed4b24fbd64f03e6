//! Plugin registry: ordered, alias-unique plugin collection and its bulk
//! lifecycle operations

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use sprocket_config::PluginsConfig;

use crate::binding::{bind, Destination};
use crate::error::{AggregateError, PluginError, PluginResult};
use crate::loader::Module;
use crate::plugin::{Collaborators, Plugin};
use crate::pool::BuildPool;
use crate::types::{PluginDescriptor, PluginInfo};

#[derive(Default)]
struct RegistryState {
    /// Plugins in registration order
    plugins: Vec<Arc<Mutex<Plugin>>>,
    /// Alias to position in `plugins`
    index: HashMap<String, usize>,
    closed: bool,
}

impl RegistryState {
    fn ensure_open(&self) -> PluginResult<()> {
        if self.closed {
            return Err(PluginError::AlreadyClosed);
        }
        Ok(())
    }

    fn get(&self, alias: &str) -> PluginResult<&Arc<Mutex<Plugin>>> {
        self.index
            .get(alias)
            .map(|&position| &self.plugins[position])
            .ok_or_else(|| PluginError::PluginNotLoaded {
                alias: alias.to_string(),
            })
    }
}

/// Plugin registry managing fetch, build, load and binding of plugins.
///
/// Bulk operations take the registry exclusively; lookups and binding share
/// it. Each plugin additionally sits behind its own lock so concurrent builds
/// only contend on their own entry.
pub struct Registry {
    plugin_dir: PathBuf,
    sources_dir: PathBuf,
    collaborators: Collaborators,
    state: RwLock<RegistryState>,
    cancel: CancellationToken,
}

impl Registry {
    /// Create an empty registry placing binaries in `plugin_dir` and sources
    /// in `<plugin_dir>/.sources`
    pub fn new(plugin_dir: impl Into<PathBuf>, collaborators: Collaborators) -> PluginResult<Self> {
        let plugin_dir = plugin_dir.into();
        if plugin_dir.as_os_str().is_empty() {
            return Err(PluginError::InvalidDirectory { path: plugin_dir });
        }

        Ok(Self {
            sources_dir: plugin_dir.join(".sources"),
            plugin_dir,
            collaborators,
            state: RwLock::new(RegistryState::default()),
            cancel: CancellationToken::new(),
        })
    }

    /// Create a registry from configuration and register its entries in order
    pub async fn from_config(config: &PluginsConfig, collaborators: Collaborators) -> PluginResult<Self> {
        let sources_dir = config.sources_dir();
        if sources_dir.as_os_str().is_empty() {
            return Err(PluginError::InvalidDirectory { path: sources_dir });
        }

        let mut registry = Self::new(&config.plugin_dir, collaborators)?;
        registry.sources_dir = sources_dir;

        for entry in &config.entries {
            registry.register(&entry.key, entry.update).await?;
        }

        Ok(registry)
    }

    /// Use a different directory for plugin sources
    pub fn with_sources_dir(mut self, sources_dir: impl Into<PathBuf>) -> Self {
        self.sources_dir = sources_dir.into();
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn sources_dir(&self) -> &Path {
        &self.sources_dir
    }

    /// Token passed to every collaborator call; cancelling it aborts running
    /// subprocesses
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a plugin by import key, returning its alias
    pub async fn register(&self, key: &str, update: bool) -> PluginResult<String> {
        let descriptor = PluginDescriptor::parse(key, &self.plugin_dir, update)?;

        let mut state = self.state.write().await;
        state.ensure_open()?;

        if state.index.contains_key(&descriptor.alias) {
            return Err(PluginError::DuplicateAlias {
                alias: descriptor.alias,
            });
        }

        let alias = descriptor.alias.clone();
        tracing::info!(
            target: "plugin_registry",
            alias = %alias,
            kind = %descriptor.kind,
            location = %descriptor.location,
            "Plugin registered"
        );

        let plugin = Plugin::new(descriptor, &self.sources_dir);
        let position = state.plugins.len();
        state.plugins.push(Arc::new(Mutex::new(plugin)));
        state.index.insert(alias.clone(), position);

        Ok(alias)
    }

    /// Fetch and pin every plugin in registration order, stopping at the
    /// first failure
    pub async fn retrieve_all(&self) -> PluginResult<()> {
        let state = self.state.write().await;
        state.ensure_open()?;

        for plugin in &state.plugins {
            let mut plugin = plugin.lock().await;
            plugin.fetch(&self.collaborators, &self.cancel).await?;
            plugin.pin(&self.collaborators, &self.cancel).await?;
        }

        Ok(())
    }

    /// Build every plugin in registration order, stopping at the first
    /// failure
    pub async fn build_all(&self) -> PluginResult<()> {
        let state = self.state.write().await;
        state.ensure_open()?;

        for plugin in &state.plugins {
            plugin.lock().await.build(&self.collaborators, &self.cancel).await?;
        }

        Ok(())
    }

    /// Build every plugin on `pool` and wait for all of them.
    ///
    /// Every plugin is attempted; all failures are returned together as
    /// [`PluginError::Aggregate`].
    pub async fn build_all_concurrent(&self, pool: &BuildPool) -> PluginResult<()> {
        let state = self.state.write().await;
        state.ensure_open()?;

        let mut jobs = Vec::with_capacity(state.plugins.len());
        for plugin in &state.plugins {
            let alias = plugin.lock().await.alias().to_string();
            let plugin = plugin.clone();
            let collaborators = self.collaborators.clone();
            let cancel = self.cancel.clone();

            jobs.push((alias, move || async move {
                plugin.lock().await.build(&collaborators, &cancel).await
            }));
        }

        tracing::info!(
            target: "plugin_registry",
            plugins = jobs.len(),
            max_concurrent = pool.max_concurrent(),
            "Building plugins concurrently"
        );

        let failures: AggregateError = pool
            .run("build", jobs)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if !failures.is_empty() {
            tracing::warn!(
                target: "plugin_registry",
                failed = failures.len(),
                "Concurrent build finished with failures"
            );
        }

        failures.into_result()
    }

    /// Run tests for plugins whose binaries changed, stopping at the first
    /// failure
    pub async fn test_all(&self) -> PluginResult<()> {
        let state = self.state.write().await;
        state.ensure_open()?;

        for plugin in &state.plugins {
            plugin.lock().await.test(&self.collaborators, &self.cancel).await?;
        }

        Ok(())
    }

    /// Load every plugin binary in registration order, stopping at the first
    /// failure
    pub async fn initialize_all(&self) -> PluginResult<()> {
        let state = self.state.write().await;
        state.ensure_open()?;

        for plugin in &state.plugins {
            plugin.lock().await.load(&self.collaborators).await?;
        }

        tracing::info!(
            target: "plugin_registry",
            plugins = state.plugins.len(),
            "Plugins initialized"
        );
        Ok(())
    }

    /// Loaded module of a plugin
    pub async fn lookup(&self, alias: &str) -> PluginResult<Arc<dyn Module>> {
        let state = self.state.read().await;
        state.ensure_open()?;

        let plugin = state.get(alias)?.lock().await;
        plugin.module().ok_or_else(|| PluginError::PluginNotLoaded {
            alias: alias.to_string(),
        })
    }

    /// Bind a loaded plugin's backend into `destination`
    pub async fn backend<D: Destination>(&self, alias: &str, destination: D) -> PluginResult<()> {
        let module = self.lookup(alias).await?;
        bind(module.as_ref(), alias, destination)
    }

    /// Close every plugin. Closing twice fails with
    /// [`PluginError::AlreadyClosed`]; every close failure is reported.
    pub async fn close_all(&self) -> PluginResult<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;
        state.closed = true;

        let mut failures = Vec::new();
        for plugin in &state.plugins {
            if let Err(e) = plugin.lock().await.close() {
                tracing::warn!(target: "plugin_registry", error = %e, "Failed to close plugin");
                failures.push(e);
            }
        }

        tracing::info!(target: "plugin_registry", "Plugin registry closed");
        AggregateError::new(failures).into_result()
    }

    pub async fn len(&self) -> PluginResult<usize> {
        let state = self.state.read().await;
        state.ensure_open()?;
        Ok(state.plugins.len())
    }

    pub async fn is_empty(&self) -> PluginResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Aliases in registration order
    pub async fn aliases(&self) -> PluginResult<Vec<String>> {
        let state = self.state.read().await;
        state.ensure_open()?;
        let mut aliases: Vec<(usize, String)> = state
            .index
            .iter()
            .map(|(alias, &position)| (position, alias.clone()))
            .collect();
        aliases.sort_unstable();
        Ok(aliases.into_iter().map(|(_, alias)| alias).collect())
    }

    /// Snapshot of one plugin
    pub async fn info(&self, alias: &str) -> PluginResult<PluginInfo> {
        let state = self.state.read().await;
        state.ensure_open()?;
        let info = state.get(alias)?.lock().await.info();
        Ok(info)
    }

    /// Snapshots of every plugin in registration order
    pub async fn list(&self) -> PluginResult<Vec<PluginInfo>> {
        let state = self.state.read().await;
        state.ensure_open()?;

        let mut infos = Vec::with_capacity(state.plugins.len());
        for plugin in &state.plugins {
            infos.push(plugin.lock().await.info());
        }
        Ok(infos)
    }
}
