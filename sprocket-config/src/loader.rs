//! Configuration loading and environment variable handling

use crate::domains::plugins::{PluginEntry, PluginsConfig};
use crate::domains::tooling::ToolingConfig;
use crate::domains::SprocketConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "SPROCKET".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<SprocketConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: SprocketConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<SprocketConfig> {
        let mut config = SprocketConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<SprocketConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut SprocketConfig) -> ConfigResult<()> {
        self.apply_plugins_overrides(&mut config.plugins)?;
        self.apply_tooling_overrides(&mut config.tooling)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_plugins_overrides(&self, config: &mut PluginsConfig) -> ConfigResult<()> {
        if let Ok(dir) = self.get_env_var("PLUGIN_DIR") {
            config.plugin_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = self.get_env_var("SOURCES_DIR") {
            config.sources_dir = Some(PathBuf::from(dir));
        }

        if let Ok(max) = self.get_env_var("MAX_CONCURRENT_BUILDS") {
            config.max_concurrent_builds = max.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid MAX_CONCURRENT_BUILDS: {}", e))
            })?;
        }

        if let Ok(run_tests) = self.get_env_var("RUN_TESTS") {
            config.run_tests = run_tests
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid RUN_TESTS: {}", e)))?;
        }

        // Comma separated keys, appended after the file's entries
        if let Ok(keys) = self.get_env_var("PLUGINS") {
            config.entries.extend(
                keys.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(PluginEntry::new),
            );
        }

        Ok(())
    }

    fn apply_tooling_overrides(&self, config: &mut ToolingConfig) -> ConfigResult<()> {
        if let Ok(git) = self.get_env_var("GIT") {
            config.git = git;
        }

        if let Ok(cargo) = self.get_env_var("CARGO") {
            config.cargo = cargo;
        }

        if let Ok(profile) = self.get_env_var("CARGO_PROFILE") {
            config.profile = profile;
        }

        if let Some(timeout) = self.get_env_seconds("FETCH_TIMEOUT")? {
            config.fetch_timeout = timeout;
        }

        if let Some(timeout) = self.get_env_seconds("BUILD_TIMEOUT")? {
            config.build_timeout = timeout;
        }

        if let Some(timeout) = self.get_env_seconds("TEST_TIMEOUT")? {
            config.test_timeout = timeout;
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn get_env_seconds(&self, name: &str) -> ConfigResult<Option<Duration>> {
        match self.get_env_var(name) {
            Ok(value) => {
                let seconds: u64 = value
                    .parse()
                    .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))?;
                Ok(Some(Duration::from_secs(seconds)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
