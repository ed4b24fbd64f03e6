//! Build toolchain collaborator

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use sprocket_config::ToolingConfig;

use crate::error::{ToolError, ToolResult};
use crate::process::{run, run_checked};

/// Result of running a plugin's test suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// The source has no tests to run
    NoTests,
    Failed,
}

/// Compiles plugin sources into loadable binaries
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Build the crate at `source` and install the library at `output`
    async fn compile(
        &self,
        source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()>;

    async fn run_tests(&self, source: &Path, cancel: &CancellationToken)
        -> ToolResult<TestOutcome>;
}

/// [`Toolchain`] backed by `cargo`
#[derive(Debug, Clone)]
pub struct CargoToolchain {
    cargo: String,
    profile: String,
    build_args: Vec<String>,
    build_timeout: Duration,
    test_timeout: Duration,
}

impl CargoToolchain {
    pub fn from_config(config: &ToolingConfig) -> Self {
        Self {
            cargo: config.cargo.clone(),
            profile: config.profile.clone(),
            build_args: config.build_args.clone(),
            build_timeout: config.build_timeout,
            test_timeout: config.test_timeout,
        }
    }
}

impl Default for CargoToolchain {
    fn default() -> Self {
        Self::from_config(&ToolingConfig::default())
    }
}

#[async_trait]
impl Toolchain for CargoToolchain {
    async fn compile(
        &self,
        source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()> {
        let mut cmd = Command::new(&self.cargo);
        cmd.current_dir(source)
            .args(["build", "--lib", "--message-format=json-render-diagnostics"])
            .args(["--profile", &self.profile])
            .args(&self.build_args);

        let result = run_checked(cmd, self.build_timeout, cancel).await?;
        let stdout = String::from_utf8_lossy(&result.stdout);

        let artifact = find_library_artifact(&stdout, source).ok_or_else(|| {
            ToolError::Artifact(format!(
                "no cdylib target produced for the package at {:?}",
                source
            ))
        })?;

        install_artifact(&artifact, output).await?;

        tracing::info!(
            target: "toolchain",
            artifact = ?artifact,
            output = ?output,
            "Installed plugin binary"
        );
        Ok(())
    }

    async fn run_tests(
        &self,
        source: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<TestOutcome> {
        let root = source.to_path_buf();
        let has_tests = tokio::task::spawn_blocking(move || contains_tests(&root))
            .await
            .map_err(|e| ToolError::Io(std::io::Error::other(e)))?;

        if !has_tests {
            return Ok(TestOutcome::NoTests);
        }

        let mut cmd = Command::new(&self.cargo);
        cmd.current_dir(source).args(["test", "--quiet"]);

        let result = run(cmd, self.test_timeout, cancel).await?;
        if result.status.success() {
            Ok(TestOutcome::Passed)
        } else {
            tracing::debug!(
                target: "toolchain",
                stdout = %String::from_utf8_lossy(&result.stdout),
                "cargo test failed"
            );
            Ok(TestOutcome::Failed)
        }
    }
}

#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    #[serde(default)]
    manifest_path: Option<PathBuf>,
    #[serde(default)]
    target: Option<CargoTarget>,
    #[serde(default)]
    filenames: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CargoTarget {
    #[serde(default)]
    crate_types: Vec<String>,
}

/// Pick the dynamic library cargo built for the package at `source`.
/// Libraries built for dependencies are never chosen.
fn find_library_artifact(stdout: &str, source: &Path) -> Option<PathBuf> {
    let mut owned = None;

    for message in stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<CargoMessage>(line).ok())
        .filter(|message| message.reason == "compiler-artifact")
    {
        let is_library = message.target.as_ref().is_some_and(|target| {
            target
                .crate_types
                .iter()
                .any(|kind| kind == "cdylib" || kind == "dylib")
        });
        if !is_library {
            continue;
        }

        let Some(file) = message.filenames.iter().find(|file| {
            file.extension()
                .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
        }) else {
            continue;
        };

        let in_source = message
            .manifest_path
            .as_deref()
            .and_then(Path::parent)
            .is_some_and(|dir| paths_match(dir, source));

        if in_source {
            owned = Some(file.clone());
        }
    }

    owned
}

fn paths_match(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Copy through a temporary sibling and rename, so `output` is either the
/// old binary or the complete new one
async fn install_artifact(artifact: &Path, output: &Path) -> ToolResult<()> {
    let parent = output.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let file_name = output
        .file_name()
        .ok_or_else(|| ToolError::Artifact(format!("invalid output path {:?}", output)))?;
    let temporary = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

    if let Err(e) = tokio::fs::copy(artifact, &temporary).await {
        let _ = tokio::fs::remove_file(&temporary).await;
        return Err(e.into());
    }

    if let Err(e) = tokio::fs::rename(&temporary, output).await {
        let _ = tokio::fs::remove_file(&temporary).await;
        return Err(e.into());
    }

    Ok(())
}

/// Whether any Rust file under `root` declares a test
fn contains_tests(root: &Path) -> bool {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name.starts_with('.') || name == "target")
        })
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "rs")
        })
        .any(|entry| {
            std::fs::read_to_string(entry.path())
                .map(|content| content.contains("#[test]") || content.contains("#[tokio::test]"))
                .unwrap_or(false)
        })
}
