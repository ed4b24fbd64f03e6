//! End-to-end registry behaviour against in-memory collaborators

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use sprocket_plugin::binding::BackendFactory;
use sprocket_plugin::{
    Backend, BuildPool, Collaborators, Module, ModuleLoader, PluginDescriptor,
    PluginError, PluginState, Registry, StaticExports, StaticModuleLoader, TestOutcome, ToolError,
    ToolResult, Toolchain, VersionControl,
};

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

trait Counter: Send {
    fn count(&self) -> usize;
}

struct Widget;

impl Greeter for Widget {
    fn greet(&self) -> String {
        "hello from widget".to_string()
    }
}

struct Quiet;

impl Greeter for Quiet {
    fn greet(&self) -> String {
        String::new()
    }
}

fn widget_backend() -> Backend {
    Backend::builder(Widget)
        .provides(|w| Box::new(w) as Box<dyn Greeter>)
        .build()
}

fn version_backend() -> Backend {
    Backend::new(String::from("2.0.0"))
}

/// Records every call, failing to fetch URLs that end with `unreachable`
#[derive(Default)]
struct RecordingVcs {
    calls: Mutex<Vec<String>>,
    unreachable: Option<String>,
}

impl RecordingVcs {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionControl for RecordingVcs {
    async fn fetch_source(&self, url: &str, dest: &Path, _: &CancellationToken) -> ToolResult<()> {
        self.calls.lock().unwrap().push(format!("fetch {}", url));
        if let Some(unreachable) = &self.unreachable {
            if url.ends_with(unreachable.as_str()) {
                return Err(ToolError::CommandFailed {
                    program: "git".to_string(),
                    args: format!("clone {}", url),
                    status: "exit status: 128".to_string(),
                    stderr: "fatal: repository not found".to_string(),
                });
            }
        }
        std::fs::create_dir_all(dest)?;
        Ok(())
    }

    async fn fetch_updates(&self, _: &Path, _: &CancellationToken) -> ToolResult<()> {
        self.calls.lock().unwrap().push("fetch updates".to_string());
        Ok(())
    }

    async fn pull_latest(&self, _: &Path, _: &CancellationToken) -> ToolResult<bool> {
        self.calls.lock().unwrap().push("pull".to_string());
        Ok(true)
    }

    async fn switch_revision(&self, _: &Path, revision: &str, _: &CancellationToken) -> ToolResult<bool> {
        self.calls.lock().unwrap().push(format!("switch {}", revision));
        Ok(true)
    }

    async fn sync_dependencies(&self, _: &Path, _: &CancellationToken) -> ToolResult<()> {
        self.calls.lock().unwrap().push("sync".to_string());
        Ok(())
    }
}

/// Writes a placeholder binary, failing for the configured source directories
#[derive(Default)]
struct CountingToolchain {
    compiles: AtomicUsize,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

#[async_trait]
impl Toolchain for CountingToolchain {
    async fn compile(&self, source: &Path, output: &Path, _: &CancellationToken) -> ToolResult<()> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if self.failing.contains(name) {
            return Err(ToolError::CommandFailed {
                program: "cargo".to_string(),
                args: "build".to_string(),
                status: "exit status: 101".to_string(),
                stderr: format!("error: could not compile `{}`", name),
            });
        }

        std::fs::create_dir_all(output.parent().unwrap())?;
        std::fs::write(output, b"binary")?;
        Ok(())
    }

    async fn run_tests(&self, _: &Path, _: &CancellationToken) -> ToolResult<TestOutcome> {
        Ok(TestOutcome::Passed)
    }
}

/// A module whose library refuses to close
struct StuckModule {
    path: PathBuf,
}

impl Module for StuckModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn backend_factory(&self) -> Option<BackendFactory> {
        None
    }

    fn abi_version(&self) -> Option<u32> {
        None
    }

    fn close(&self) -> ToolResult<()> {
        Err(ToolError::Load {
            path: self.path.clone(),
            reason: "library still in use".to_string(),
        })
    }
}

/// Records every load, handing out a [`StuckModule`] for `stuck`
struct TrackingLoader {
    inner: StaticModuleLoader,
    loads: Mutex<Vec<PathBuf>>,
    stuck: Option<PathBuf>,
}

impl TrackingLoader {
    fn new(inner: StaticModuleLoader) -> Self {
        Self {
            inner,
            loads: Mutex::new(Vec::new()),
            stuck: None,
        }
    }

    fn loads(&self) -> Vec<PathBuf> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModuleLoader for TrackingLoader {
    async fn load(&self, path: &Path) -> ToolResult<Arc<dyn Module>> {
        self.loads.lock().unwrap().push(path.to_path_buf());
        if self.stuck.as_deref() == Some(path) {
            return Ok(Arc::new(StuckModule {
                path: path.to_path_buf(),
            }));
        }
        self.inner.load(path).await
    }
}

fn binary(dir: &Path, alias: &str) -> PathBuf {
    dir.join(format!("{}.{}", alias, std::env::consts::DLL_EXTENSION))
}

fn registry(
    plugin_dir: &Path,
    vcs: Arc<RecordingVcs>,
    toolchain: Arc<CountingToolchain>,
    loader: StaticModuleLoader,
) -> Registry {
    Registry::new(plugin_dir, Collaborators::new(vcs, toolchain, Arc::new(loader))).unwrap()
}

#[test]
fn test_descriptor_is_deterministic() {
    let root = Path::new("/opt/sprocket/plugins");
    let first = PluginDescriptor::parse("github.com/acme/widget@v2", root, false).unwrap();
    let second = PluginDescriptor::parse("github.com/acme/widget@v2", root, false).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.binary_path, binary(root, "widget"));
}

#[tokio::test]
async fn test_widget_scenario() {
    let temp = tempfile::tempdir().unwrap();
    let vcs = Arc::new(RecordingVcs::default());
    let toolchain = Arc::new(CountingToolchain::default());
    let loader = StaticModuleLoader::new().with_module(binary(temp.path(), "widget"), StaticExports::new(widget_backend));
    let registry = registry(temp.path(), vcs.clone(), toolchain.clone(), loader);

    let alias = registry.register("github.com/acme/widget@v2", false).await.unwrap();
    assert_eq!(alias, "widget");

    let info = registry.info("widget").await.unwrap();
    assert_eq!(info.descriptor.location, "https://github.com/acme/widget");
    assert_eq!(info.descriptor.revision.as_deref(), Some("v2"));
    assert_eq!(info.state, PluginState::Parsed);

    registry.retrieve_all().await.unwrap();
    registry.build_all().await.unwrap();
    registry.test_all().await.unwrap();
    registry.initialize_all().await.unwrap();

    assert_eq!(
        vcs.calls(),
        vec!["fetch https://github.com/acme/widget", "switch v2", "sync"]
    );
    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 1);
    assert!(binary(temp.path(), "widget").exists());
    assert!(temp.path().join(".sources/github.com/acme/widget").is_dir());

    let mut greeter: Box<dyn Greeter> = Box::new(Quiet);
    registry.backend("widget", &mut greeter).await.unwrap();
    assert_eq!(greeter.greet(), "hello from widget");

    let info = registry.info("widget").await.unwrap();
    assert_eq!(info.state, PluginState::Loaded);
    assert!(info.is_loaded());

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_alias_leaves_registry_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    let registry = registry(
        temp.path(),
        Arc::default(),
        Arc::default(),
        StaticModuleLoader::new(),
    );

    registry.register("github.com/acme/widget", false).await.unwrap();
    let before = registry.len().await.unwrap();

    let err = registry.register("./vendor/widget.so", false).await.unwrap_err();
    assert!(matches!(err, PluginError::DuplicateAlias { ref alias } if alias == "widget"));
    assert_eq!(registry.len().await.unwrap(), before);
    assert_eq!(registry.aliases().await.unwrap(), vec!["widget"]);
}

#[tokio::test]
async fn test_build_cache_hit_skips_compiler() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(binary(temp.path(), "widget"), b"cached").unwrap();
    std::fs::create_dir_all(temp.path().join(".sources/github.com/acme/widget")).unwrap();

    let toolchain = Arc::new(CountingToolchain::default());
    let cached = registry(temp.path(), Arc::default(), toolchain.clone(), StaticModuleLoader::new());
    cached.register("github.com/acme/widget", false).await.unwrap();
    cached.retrieve_all().await.unwrap();
    cached.build_all().await.unwrap();
    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 0);
    assert!(!cached.info("widget").await.unwrap().rebuilt);

    let vcs = Arc::new(RecordingVcs::default());
    let updated = registry(temp.path(), vcs.clone(), toolchain.clone(), StaticModuleLoader::new());
    updated.register("github.com/acme/widget", true).await.unwrap();
    updated.retrieve_all().await.unwrap();
    updated.build_all().await.unwrap();
    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 1);
    assert_eq!(vcs.calls(), vec!["pull", "sync"]);
}

#[tokio::test]
async fn test_concurrent_build_reports_every_failure() {
    let temp = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(CountingToolchain {
        failing: ["beta", "delta"].iter().map(|s| s.to_string()).collect(),
        delay: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    let registry = registry(temp.path(), Arc::default(), toolchain.clone(), StaticModuleLoader::new());

    let names = ["alpha", "beta", "gamma", "delta", "epsilon"];
    for name in names {
        registry
            .register(&format!("github.com/acme/{}", name), false)
            .await
            .unwrap();
    }
    registry.retrieve_all().await.unwrap();

    let err = registry
        .build_all_concurrent(&BuildPool::new(2))
        .await
        .unwrap_err();

    let PluginError::Aggregate(aggregate) = err else {
        panic!("expected aggregate error");
    };
    assert_eq!(aggregate.len(), 2);
    let failed: Vec<&str> = aggregate.errors().iter().filter_map(|e| e.alias()).collect();
    assert_eq!(failed, vec!["beta", "delta"]);
    assert!(aggregate.to_string().starts_with("2 errors occurred:"));

    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), names.len());
    assert!(binary(temp.path(), "alpha").exists());
    assert!(binary(temp.path(), "epsilon").exists());
    assert!(!binary(temp.path(), "beta").exists());
}

#[tokio::test]
async fn test_binding_through_registry() {
    let temp = tempfile::tempdir().unwrap();
    let widget = binary(temp.path(), "widget");
    let version = binary(temp.path(), "version");
    std::fs::write(&widget, b"").unwrap();
    std::fs::write(&version, b"").unwrap();

    let loader = StaticModuleLoader::new()
        .with_module(&widget, StaticExports::new(widget_backend))
        .with_module(&version, StaticExports::new(version_backend));
    let registry = registry(temp.path(), Arc::default(), Arc::default(), loader);

    registry.register(widget.to_str().unwrap(), false).await.unwrap();
    registry
        .register(&format!("{}(version)", version.display()), false)
        .await
        .unwrap();
    registry.retrieve_all().await.unwrap();
    registry.build_all().await.unwrap();
    registry.initialize_all().await.unwrap();

    // Exact type
    let mut text = String::new();
    registry.backend("version", &mut text).await.unwrap();
    assert_eq!(text, "2.0.0");

    // Declared capability
    let greeter: OnceLock<Box<dyn Greeter>> = OnceLock::new();
    registry.backend("widget", &greeter).await.unwrap();
    assert_eq!(greeter.get().unwrap().greet(), "hello from widget");

    // Mismatch leaves the destination alone
    let mut counter: Option<Box<dyn Counter>> = None;
    let err = registry.backend("widget", &mut counter).await.unwrap_err();
    assert!(matches!(err, PluginError::TypeMismatch { .. }));
    assert!(counter.is_none());

    let err = registry.backend("missing", &mut text).await.unwrap_err();
    assert!(matches!(err, PluginError::PluginNotLoaded { .. }));
}

#[tokio::test]
async fn test_double_close() {
    let temp = tempfile::tempdir().unwrap();
    let widget = binary(temp.path(), "widget");
    std::fs::write(&widget, b"").unwrap();

    let loader = StaticModuleLoader::new().with_module(&widget, StaticExports::new(widget_backend));
    let registry = registry(temp.path(), Arc::default(), Arc::default(), loader);
    registry.register(widget.to_str().unwrap(), false).await.unwrap();
    registry.initialize_all().await.unwrap();

    let module = registry.lookup("widget").await.unwrap();
    registry.close_all().await.unwrap();
    assert!(module.backend_factory().is_none());

    assert!(matches!(registry.close_all().await, Err(PluginError::AlreadyClosed)));
    assert!(matches!(
        registry.lookup("widget").await.err(),
        Some(PluginError::AlreadyClosed)
    ));
}

#[tokio::test]
async fn test_close_reports_failure_and_closes_the_rest() {
    let temp = tempfile::tempdir().unwrap();
    let first = binary(temp.path(), "first");
    let stuck = binary(temp.path(), "stuck");
    let last = binary(temp.path(), "last");
    for path in [&first, &stuck, &last] {
        std::fs::write(path, b"").unwrap();
    }

    let mut loader = TrackingLoader::new(
        StaticModuleLoader::new()
            .with_module(&first, StaticExports::new(widget_backend))
            .with_module(&last, StaticExports::new(version_backend)),
    );
    loader.stuck = Some(stuck.clone());
    let registry = Registry::new(
        temp.path(),
        Collaborators::new(
            Arc::new(RecordingVcs::default()),
            Arc::new(CountingToolchain::default()),
            Arc::new(loader),
        ),
    )
    .unwrap();

    for path in [&first, &stuck, &last] {
        registry.register(path.to_str().unwrap(), false).await.unwrap();
    }
    registry.initialize_all().await.unwrap();

    let first_module = registry.lookup("first").await.unwrap();
    let last_module = registry.lookup("last").await.unwrap();
    assert!(first_module.backend_factory().is_some());
    assert!(last_module.backend_factory().is_some());

    let err = registry.close_all().await.unwrap_err();
    let PluginError::Aggregate(aggregate) = err else {
        panic!("expected aggregate error");
    };
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.errors()[0].alias(), Some("stuck"));
    assert!(matches!(
        aggregate.errors()[0],
        PluginError::Step { step: "close", .. }
    ));

    assert!(first_module.backend_factory().is_none());
    assert!(last_module.backend_factory().is_none());
    assert!(registry.is_closed().await);
}

#[tokio::test]
async fn test_retrieve_stops_at_first_failure() {
    let temp = tempfile::tempdir().unwrap();
    let vcs = Arc::new(RecordingVcs {
        unreachable: Some("beta".to_string()),
        ..Default::default()
    });
    let registry = registry(temp.path(), vcs.clone(), Arc::default(), StaticModuleLoader::new());
    for name in ["alpha", "beta", "gamma"] {
        registry
            .register(&format!("github.com/acme/{}", name), false)
            .await
            .unwrap();
    }

    let err = registry.retrieve_all().await.unwrap_err();
    assert!(matches!(err, PluginError::Step { ref alias, step: "fetch", .. } if alias == "beta"));

    let fetched: Vec<String> = vcs
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("fetch "))
        .collect();
    assert_eq!(
        fetched,
        vec!["fetch https://github.com/acme/alpha", "fetch https://github.com/acme/beta"]
    );
    assert_eq!(registry.info("alpha").await.unwrap().state, PluginState::Pinned);
    assert_eq!(registry.info("gamma").await.unwrap().state, PluginState::Parsed);
    assert!(!temp.path().join(".sources/github.com/acme/gamma").exists());
}

#[tokio::test]
async fn test_build_stops_at_first_failure() {
    let temp = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(CountingToolchain {
        failing: ["beta".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let registry = registry(temp.path(), Arc::default(), toolchain.clone(), StaticModuleLoader::new());
    for name in ["alpha", "beta", "gamma"] {
        registry
            .register(&format!("github.com/acme/{}", name), false)
            .await
            .unwrap();
    }
    registry.retrieve_all().await.unwrap();

    let err = registry.build_all().await.unwrap_err();
    assert_eq!(err.alias(), Some("beta"));

    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 2);
    assert!(binary(temp.path(), "alpha").exists());
    assert!(!binary(temp.path(), "gamma").exists());
    assert_eq!(registry.info("alpha").await.unwrap().state, PluginState::Built);
    assert_eq!(registry.info("gamma").await.unwrap().state, PluginState::Pinned);
}

#[tokio::test]
async fn test_initialize_stops_at_first_failure() {
    let temp = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|alias| binary(temp.path(), alias))
        .collect();
    for path in &paths {
        std::fs::write(path, b"").unwrap();
    }

    // beta has no module behind its binary
    let loader = Arc::new(TrackingLoader::new(
        StaticModuleLoader::new()
            .with_module(&paths[0], StaticExports::new(widget_backend))
            .with_module(&paths[2], StaticExports::new(version_backend)),
    ));
    let registry = Registry::new(
        temp.path(),
        Collaborators::new(
            Arc::new(RecordingVcs::default()),
            Arc::new(CountingToolchain::default()),
            loader.clone(),
        ),
    )
    .unwrap();
    for path in &paths {
        registry.register(path.to_str().unwrap(), false).await.unwrap();
    }

    let err = registry.initialize_all().await.unwrap_err();
    assert!(matches!(err, PluginError::Step { ref alias, step: "load", .. } if alias == "beta"));

    assert_eq!(loader.loads(), paths[..2].to_vec());
    assert!(registry.info("alpha").await.unwrap().is_loaded());
    assert!(!registry.info("gamma").await.unwrap().is_loaded());
    assert!(matches!(
        registry.lookup("gamma").await.err(),
        Some(PluginError::PluginNotLoaded { .. })
    ));
}
