//! A single plugin and its lifecycle steps

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sprocket_config::ToolingConfig;
use sprocket_logging::Scribe;

use crate::error::{PluginError, PluginResult};
use crate::loader::{DylibLoader, Module, ModuleLoader};
use crate::toolchain::{CargoToolchain, TestOutcome, Toolchain};
use crate::types::{PluginDescriptor, PluginInfo, PluginState, SourceKind};
use crate::vcs::{GitCli, VersionControl};

/// The external systems a plugin's lifecycle relies on
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn VersionControl>,
    pub toolchain: Arc<dyn Toolchain>,
    pub loader: Arc<dyn ModuleLoader>,
}

impl Collaborators {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        toolchain: Arc<dyn Toolchain>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        Self {
            vcs,
            toolchain,
            loader,
        }
    }

    /// git, cargo and dynamic library loading as configured
    pub fn from_config(config: &ToolingConfig) -> Self {
        Self::new(
            Arc::new(GitCli::from_config(config)),
            Arc::new(CargoToolchain::from_config(config)),
            Arc::new(DylibLoader::new()),
        )
    }
}

/// A registered plugin.
///
/// Steps advance [`PluginState`] and never move it backwards, so calling a
/// step again after a later one has run is harmless.
pub struct Plugin {
    descriptor: PluginDescriptor,
    state: PluginState,
    scribe: Scribe,
    module: Option<Arc<dyn Module>>,
    source_dir: Option<PathBuf>,
    fresh_source: bool,
    rebuilt: bool,
    loaded_at: Option<DateTime<Utc>>,
}

impl Plugin {
    /// Create a plugin whose sources, if any, live under `sources_dir`
    pub fn new(descriptor: PluginDescriptor, sources_dir: &Path) -> Self {
        let source_dir = descriptor
            .repository
            .as_ref()
            .map(|repository| sources_dir.join(&repository.host_path));

        Self {
            scribe: Scribe::new(&descriptor.alias),
            descriptor,
            state: PluginState::Parsed,
            module: None,
            source_dir,
            fresh_source: false,
            rebuilt: false,
            loaded_at: None,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn alias(&self) -> &str {
        &self.descriptor.alias
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn module(&self) -> Option<Arc<dyn Module>> {
        self.module.clone()
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            descriptor: self.descriptor.clone(),
            state: self.state,
            source_dir: self.source_dir.clone(),
            rebuilt: self.rebuilt,
            loaded_at: self.loaded_at,
        }
    }

    fn advance(&mut self, state: PluginState) {
        self.state = self.state.max(state);
    }

    fn ensure_open(&self, step: &'static str) -> PluginResult<()> {
        if self.state == PluginState::Closed {
            return Err(self.out_of_order(step));
        }
        Ok(())
    }

    fn out_of_order(&self, step: &'static str) -> PluginError {
        PluginError::OutOfOrder {
            alias: self.alias().to_string(),
            step,
            state: self.state,
        }
    }

    /// Make the plugin's source available locally.
    ///
    /// An existing checkout is reused; when an update was requested the pin
    /// step pulls instead of cloning again.
    pub async fn fetch(
        &mut self,
        collaborators: &Collaborators,
        cancel: &CancellationToken,
    ) -> PluginResult<()> {
        self.ensure_open("fetch")?;

        let (Some(url), Some(source_dir)) = (
            self.descriptor.repository.as_ref().map(|repository| repository.url.clone()),
            self.source_dir.clone(),
        ) else {
            // Nothing to retrieve for a prebuilt binary
            self.advance(PluginState::Pinned);
            return Ok(());
        };

        if tokio::fs::metadata(&source_dir).await.is_ok() {
            tracing::debug!(
                target: "plugin",
                alias = %self.descriptor.alias,
                path = ?source_dir,
                "Source already present"
            );
            self.advance(PluginState::Fetched);
            return Ok(());
        }

        self.scribe.notify(format_args!("Fetching {}", url));
        collaborators
            .vcs
            .fetch_source(&url, &source_dir, cancel)
            .await
            .map_err(|e| PluginError::step(&self.descriptor.alias, "fetch", e))?;

        self.fresh_source = true;
        self.advance(PluginState::Fetched);
        self.scribe.success("Source fetched");
        Ok(())
    }

    /// Put the checkout at the requested revision, or at the latest one when
    /// an update was requested. With an update requested, a pinned revision
    /// is resolved against freshly fetched history and a pinned branch is
    /// fast-forwarded.
    ///
    /// Dependencies are synced after a fresh fetch and whenever the checkout
    /// moved. Already being at the requested revision is a success that skips
    /// the sync.
    pub async fn pin(
        &mut self,
        collaborators: &Collaborators,
        cancel: &CancellationToken,
    ) -> PluginResult<()> {
        self.ensure_open("pin")?;

        let Some(source_dir) = self.source_dir.clone() else {
            self.advance(PluginState::Pinned);
            return Ok(());
        };

        if self.state < PluginState::Fetched {
            return Err(self.out_of_order("pin"));
        }

        let alias = self.descriptor.alias.clone();
        let refresh = self.descriptor.update_requested && !self.fresh_source;
        let moved = match self.descriptor.revision.clone() {
            Some(revision) => {
                if refresh {
                    collaborators
                        .vcs
                        .fetch_updates(&source_dir, cancel)
                        .await
                        .map_err(|e| PluginError::step(&alias, "pin", e))?;
                }

                let switched = collaborators
                    .vcs
                    .switch_revision(&source_dir, &revision, cancel)
                    .await
                    .map_err(|e| PluginError::step(&alias, "pin", e))?;

                // A pinned branch still moves upstream
                let pulled = refresh
                    && collaborators
                        .vcs
                        .pull_latest(&source_dir, cancel)
                        .await
                        .map_err(|e| PluginError::step(&alias, "pin", e))?;

                if switched || pulled {
                    self.scribe.notify(format_args!("Set version: {}", revision));
                } else {
                    self.scribe.success(format_args!("Already at {}", revision));
                }
                switched || pulled
            }
            None if self.fresh_source => false,
            None if self.descriptor.update_requested => {
                let changed = collaborators
                    .vcs
                    .pull_latest(&source_dir, cancel)
                    .await
                    .map_err(|e| PluginError::step(&alias, "pin", e))?;

                if changed {
                    self.scribe.notify("Updated to latest ref");
                } else {
                    self.scribe.success("Already up to date");
                }
                changed
            }
            None => {
                self.scribe.success("Using cached source");
                false
            }
        };

        if moved || self.fresh_source {
            self.scribe.notify("Updating dependencies");
            collaborators
                .vcs
                .sync_dependencies(&source_dir, cancel)
                .await
                .map_err(|e| PluginError::step(&alias, "sync dependencies", e))?;
            self.scribe.success("Dependencies downloaded");
        }

        self.fresh_source = false;
        self.advance(PluginState::Pinned);
        Ok(())
    }

    /// Produce the plugin binary, reusing one already on disk unless an
    /// update was requested
    pub async fn build(
        &mut self,
        collaborators: &Collaborators,
        cancel: &CancellationToken,
    ) -> PluginResult<()> {
        self.ensure_open("build")?;

        let binary_path = self.descriptor.binary_path.clone();
        let binary_exists = tokio::fs::metadata(&binary_path).await.is_ok();

        if binary_exists && !self.descriptor.update_requested {
            tracing::debug!(
                target: "plugin",
                alias = %self.descriptor.alias,
                path = ?binary_path,
                "Using cached binary"
            );
            self.advance(PluginState::Built);
            return Ok(());
        }

        let Some(source_dir) = self.source_dir.clone() else {
            if !binary_exists {
                return Err(PluginError::BinaryNotFound {
                    alias: self.descriptor.alias.clone(),
                    path: binary_path,
                });
            }
            self.advance(PluginState::Built);
            return Ok(());
        };

        if tokio::fs::metadata(&source_dir).await.is_err() {
            return Err(self.out_of_order("build"));
        }

        let build_dir = match self
            .descriptor
            .repository
            .as_ref()
            .and_then(|repository| repository.subdirectory.as_deref())
        {
            Some(subdirectory) => source_dir.join(subdirectory),
            None => source_dir,
        };

        self.scribe.notify("Building");
        collaborators
            .toolchain
            .compile(&build_dir, &binary_path, cancel)
            .await
            .map_err(|e| PluginError::step(&self.descriptor.alias, "build", e))?;

        self.rebuilt = true;
        self.advance(PluginState::Built);
        self.scribe.success("Build complete");
        Ok(())
    }

    /// Run the plugin's tests when its binary is new to this process or an
    /// update was requested
    pub async fn test(
        &mut self,
        collaborators: &Collaborators,
        cancel: &CancellationToken,
    ) -> PluginResult<()> {
        self.ensure_open("test")?;

        if self.descriptor.kind != SourceKind::VersionControlled {
            return Ok(());
        }

        if self.state < PluginState::Built {
            return Err(self.out_of_order("test"));
        }

        if !self.rebuilt && !self.descriptor.update_requested {
            tracing::debug!(
                target: "plugin",
                alias = %self.descriptor.alias,
                "Binary unchanged, skipping tests"
            );
            return Ok(());
        }

        let Some(source_dir) = self.source_dir.clone() else {
            return Ok(());
        };
        let test_dir = match self
            .descriptor
            .repository
            .as_ref()
            .and_then(|repository| repository.subdirectory.as_deref())
        {
            Some(subdirectory) => source_dir.join(subdirectory),
            None => source_dir,
        };

        let outcome = collaborators
            .toolchain
            .run_tests(&test_dir, cancel)
            .await
            .map_err(|e| PluginError::step(&self.descriptor.alias, "test", e))?;

        match outcome {
            TestOutcome::Passed => self.scribe.success("Test passed"),
            TestOutcome::NoTests => self.scribe.warning("No test files"),
            TestOutcome::Failed => {
                self.scribe.error("Test failed");
                return Err(PluginError::TestsFailed {
                    alias: self.descriptor.alias.clone(),
                });
            }
        }

        self.advance(PluginState::Tested);
        Ok(())
    }

    /// Load the binary into the process. Loading twice keeps the first module.
    pub async fn load(&mut self, collaborators: &Collaborators) -> PluginResult<()> {
        self.ensure_open("load")?;

        if self.module.is_some() {
            return Ok(());
        }

        let binary_path = &self.descriptor.binary_path;
        if tokio::fs::metadata(binary_path).await.is_err() {
            return Err(PluginError::BinaryNotFound {
                alias: self.descriptor.alias.clone(),
                path: binary_path.clone(),
            });
        }

        let module = collaborators
            .loader
            .load(binary_path)
            .await
            .map_err(|e| PluginError::step(&self.descriptor.alias, "load", e))?;

        self.module = Some(module);
        self.loaded_at = Some(Utc::now());
        self.advance(PluginState::Loaded);
        self.scribe.success("Plugin initialized");
        Ok(())
    }

    /// Release the module, if loaded. The plugin is closed even when the
    /// module fails to close.
    pub fn close(&mut self) -> PluginResult<()> {
        let module = self.module.take();
        self.state = PluginState::Closed;

        if let Some(module) = module {
            module
                .close()
                .map_err(|e| PluginError::step(&self.descriptor.alias, "close", e))?;
        }
        Ok(())
    }
}
