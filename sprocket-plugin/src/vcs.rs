//! Version control collaborator

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use sprocket_config::ToolingConfig;

use crate::error::ToolResult;
use crate::process::{run, run_checked};

/// Source retrieval for version-controlled plugins
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Obtain a fresh copy of `url` at `dest`
    async fn fetch_source(&self, url: &str, dest: &Path, cancel: &CancellationToken)
        -> ToolResult<()>;

    /// Download new upstream history without touching the working tree
    async fn fetch_updates(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<()>;

    /// Bring the checked out branch up to date; `true` when anything changed.
    /// A checkout pinned to a tag or commit is left alone.
    async fn pull_latest(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<bool>;

    /// Check out `revision`; `false` when it was already checked out
    async fn switch_revision(
        &self,
        dest: &Path,
        revision: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<bool>;

    /// Download whatever the checkout needs to build
    async fn sync_dependencies(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<()>;
}

/// [`VersionControl`] backed by the `git` command line
#[derive(Debug, Clone)]
pub struct GitCli {
    git: String,
    cargo: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(git: impl Into<String>, cargo: impl Into<String>, timeout: Duration) -> Self {
        Self {
            git: git.into(),
            cargo: cargo.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ToolingConfig) -> Self {
        Self::new(&config.git, &config.cargo, config.fetch_timeout)
    }

    fn git(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.git);
        cmd.current_dir(dir)
            // Never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    async fn head(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<String> {
        let mut cmd = self.git(dest);
        cmd.args(["rev-parse", "HEAD"]);
        let output = run_checked(cmd, self.timeout, cancel).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Commit a revision resolves to locally, if it resolves at all
    async fn resolve(
        &self,
        dest: &Path,
        revision: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        let mut cmd = self.git(dest);
        cmd.args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", revision));
        let output = run(cmd, self.timeout, cancel).await?;

        Ok(output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Whether HEAD is a branch rather than a detached commit
    async fn on_branch(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<bool> {
        let mut cmd = self.git(dest);
        cmd.args(["symbolic-ref", "--quiet", "HEAD"]);
        let output = run(cmd, self.timeout, cancel).await?;
        Ok(output.status.success())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_config(&ToolingConfig::default())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn fetch_source(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let mut cmd = Command::new(&self.git);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .args(["clone", "--quiet", "--recurse-submodules", url])
            .arg(dest);

        if let Err(e) = run_checked(cmd, self.timeout, cancel).await {
            // Leave nothing half-cloned behind, the next fetch starts over
            if tokio::fs::metadata(dest).await.is_ok() {
                if let Err(cleanup) = tokio::fs::remove_dir_all(dest).await {
                    tracing::warn!(
                        target: "vcs",
                        path = ?dest,
                        error = %cleanup,
                        "Failed to remove partial clone"
                    );
                }
            }
            return Err(e);
        }

        tracing::info!(target: "vcs", url = url, path = ?dest, "Cloned repository");
        Ok(())
    }

    async fn fetch_updates(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<()> {
        let mut cmd = self.git(dest);
        cmd.args(["fetch", "--quiet", "--tags", "origin"]);
        run_checked(cmd, self.timeout, cancel).await?;
        tracing::debug!(target: "vcs", path = ?dest, "Fetched upstream changes");
        Ok(())
    }

    async fn pull_latest(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<bool> {
        if !self.on_branch(dest, cancel).await? {
            tracing::debug!(target: "vcs", path = ?dest, "Detached HEAD, nothing to pull");
            return Ok(false);
        }

        let before = self.head(dest, cancel).await?;

        let mut cmd = self.git(dest);
        cmd.args(["pull", "--ff-only", "--quiet"]);
        run_checked(cmd, self.timeout, cancel).await?;

        let after = self.head(dest, cancel).await?;
        tracing::debug!(target: "vcs", path = ?dest, before = %before, after = %after, "Pulled");
        Ok(before != after)
    }

    async fn switch_revision(
        &self,
        dest: &Path,
        revision: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<bool> {
        let current = self.head(dest, cancel).await?;

        let target = match self.resolve(dest, revision, cancel).await? {
            Some(target) => Some(target),
            None => {
                // Unknown locally, it may be a new tag or branch
                self.fetch_updates(dest, cancel).await?;
                self.resolve(dest, revision, cancel).await?
            }
        };

        if target.as_deref() == Some(current.as_str()) {
            return Ok(false);
        }

        let mut cmd = self.git(dest);
        cmd.args(["checkout", "--quiet", revision]);
        run_checked(cmd, self.timeout, cancel).await?;

        tracing::info!(target: "vcs", path = ?dest, revision = revision, "Switched revision");
        Ok(true)
    }

    async fn sync_dependencies(&self, dest: &Path, cancel: &CancellationToken) -> ToolResult<()> {
        let mut cmd = self.git(dest);
        cmd.args(["submodule", "update", "--init", "--recursive", "--quiet"]);
        run_checked(cmd, self.timeout, cancel).await?;

        if tokio::fs::metadata(dest.join("Cargo.toml")).await.is_ok() {
            let mut cmd = Command::new(&self.cargo);
            cmd.arg("fetch").current_dir(dest);
            run_checked(cmd, self.timeout, cancel).await?;
        }

        Ok(())
    }
}
