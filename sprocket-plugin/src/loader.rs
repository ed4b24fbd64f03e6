//! Module loading for dynamic libraries and in-process plugins

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::binding::{AbiVersionFn, BackendFactory, BACKEND_ABI_SYMBOL, BACKEND_ABI_VERSION, BACKEND_SYMBOL};
use crate::error::{ToolError, ToolResult};

/// A loaded plugin binary
pub trait Module: Send + Sync {
    /// File the module was loaded from
    fn path(&self) -> &Path;

    /// The exported backend factory, if the module has one
    fn backend_factory(&self) -> Option<BackendFactory>;

    /// The exported backend ABI tag, if the module has one
    fn abi_version(&self) -> Option<u32>;

    /// Stop handing out backends. Backends already bound stay valid.
    fn close(&self) -> ToolResult<()>;
}

/// Opens plugin binaries
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, path: &Path) -> ToolResult<Arc<dyn Module>>;
}

/// Dynamic module loader for plugins built as shared libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl DylibLoader {
    pub fn new() -> Self {
        Self
    }

    /// Open a shared library and keep it mapped for the rest of the process
    async fn open(path: &Path) -> ToolResult<DylibModule> {
        let owned = path.to_path_buf();

        // SAFETY: running a library's initialisers is inherent to loading a
        // plugin; the registry only loads binaries it was told to trust.
        let library = tokio::task::spawn_blocking(move || unsafe { libloading::Library::new(owned) })
            .await
            .map_err(|e| ToolError::Load {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .map_err(|e| ToolError::Load {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        tracing::debug!(target: "module_loader", path = ?path, "Loaded dynamic library");

        // Bound backends carry vtables and code from the library, so it is
        // never unmapped
        let library: &'static libloading::Library = Box::leak(Box::new(library));

        Ok(DylibModule {
            path: path.to_path_buf(),
            library,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ModuleLoader for DylibLoader {
    async fn load(&self, path: &Path) -> ToolResult<Arc<dyn Module>> {
        Ok(Arc::new(Self::open(path).await?))
    }
}

/// A shared library that stays mapped once opened
pub struct DylibModule {
    path: PathBuf,
    library: &'static libloading::Library,
    closed: AtomicBool,
}

impl DylibModule {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Module for DylibModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn backend_factory(&self) -> Option<BackendFactory> {
        if self.is_closed() {
            return None;
        }

        // SAFETY: the symbol type is guarded by the ABI tag, checked before
        // the factory is ever invoked.
        unsafe {
            self.library
                .get::<BackendFactory>(BACKEND_SYMBOL.as_bytes())
                .ok()
                .map(|symbol| *symbol)
        }
    }

    fn abi_version(&self) -> Option<u32> {
        if self.is_closed() {
            return None;
        }

        // SAFETY: export_backend! declares the tag as `extern "C" fn() -> u32`.
        unsafe {
            self.library
                .get::<AbiVersionFn>(BACKEND_ABI_SYMBOL.as_bytes())
                .ok()
                .map(|tag| tag())
        }
    }

    fn close(&self) -> ToolResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "module_loader", path = ?self.path, "Closed dynamic library");
        }
        Ok(())
    }
}

/// Symbols a static module exports
#[derive(Debug, Clone, Copy)]
pub struct StaticExports {
    pub backend: Option<BackendFactory>,
    pub abi_version: Option<u32>,
}

impl StaticExports {
    /// Exports matching what `export_backend!` generates
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            backend: Some(factory),
            abi_version: Some(BACKEND_ABI_VERSION),
        }
    }

    /// A module exporting nothing
    pub fn empty() -> Self {
        Self {
            backend: None,
            abi_version: None,
        }
    }

    pub fn with_abi_version(mut self, abi_version: Option<u32>) -> Self {
        self.abi_version = abi_version;
        self
    }
}

/// Static module loader for plugins compiled into the host.
///
/// Modules are registered against the path they stand in for, so the
/// registry's on-disk layout and lifecycle apply unchanged.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: RwLock<HashMap<PathBuf, StaticExports>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, path: impl Into<PathBuf>, exports: StaticExports) -> Self {
        self.register(path, exports);
        self
    }

    pub fn register(&self, path: impl Into<PathBuf>, exports: StaticExports) {
        self.modules.write().insert(path.into(), exports);
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.modules.read().contains_key(path)
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    async fn load(&self, path: &Path) -> ToolResult<Arc<dyn Module>> {
        let exports = self
            .modules
            .read()
            .get(path)
            .copied()
            .ok_or_else(|| ToolError::Load {
                path: path.to_path_buf(),
                reason: "no static module registered for this path".to_string(),
            })?;

        Ok(Arc::new(StaticModule {
            path: path.to_path_buf(),
            exports,
            closed: AtomicBool::new(false),
        }))
    }
}

/// An in-process module
pub struct StaticModule {
    path: PathBuf,
    exports: StaticExports,
    closed: AtomicBool,
}

impl StaticModule {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Module for StaticModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn backend_factory(&self) -> Option<BackendFactory> {
        if self.is_closed() {
            return None;
        }
        self.exports.backend
    }

    fn abi_version(&self) -> Option<u32> {
        if self.is_closed() {
            return None;
        }
        self.exports.abi_version
    }

    fn close(&self) -> ToolResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
