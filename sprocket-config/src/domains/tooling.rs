//! External tool configuration (git, cargo)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Tooling configuration for the fetch, build and test steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolingConfig {
    /// Git executable
    #[serde(default = "default_git")]
    pub git: String,

    /// Cargo executable
    #[serde(default = "default_cargo")]
    pub cargo: String,

    /// Cargo profile used for plugin builds
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Extra arguments appended to `cargo build`
    #[serde(default)]
    pub build_args: Vec<String>,

    /// Timeout for clone, pull and checkout operations
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,

    /// Timeout for a single plugin build
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_build_timeout")]
    pub build_timeout: Duration,

    /// Timeout for a plugin test run
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_test_timeout")]
    pub test_timeout: Duration,
}

impl Default for ToolingConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            cargo: default_cargo(),
            profile: default_profile(),
            build_args: Vec::new(),
            fetch_timeout: default_fetch_timeout(),
            build_timeout: default_build_timeout(),
            test_timeout: default_test_timeout(),
        }
    }
}

impl Validatable for ToolingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.git, "git", self.domain_name())?;
        validate_required_string(&self.cargo, "cargo", self.domain_name())?;
        validate_required_string(&self.profile, "profile", self.domain_name())?;

        validate_positive(self.fetch_timeout.as_secs(), "fetch_timeout", self.domain_name())?;
        validate_positive(self.build_timeout.as_secs(), "build_timeout", self.domain_name())?;
        validate_positive(self.test_timeout.as_secs(), "test_timeout", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "tooling"
    }
}

fn default_git() -> String {
    "git".to_string()
}

fn default_cargo() -> String {
    "cargo".to_string()
}

fn default_profile() -> String {
    "release".to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_build_timeout() -> Duration {
    Duration::from_secs(900)
}

fn default_test_timeout() -> Duration {
    Duration::from_secs(600)
}
