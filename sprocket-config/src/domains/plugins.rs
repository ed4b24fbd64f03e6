//! Plugin directory and plugin list configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_path, validate_required_string, Validatable};

/// Plugin management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory receiving built plugin binaries
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,

    /// Directory holding fetched plugin sources, defaults to `<plugin_dir>/.sources`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_dir: Option<PathBuf>,

    /// Plugins to register, in load order
    #[serde(default)]
    pub entries: Vec<PluginEntry>,

    /// Upper bound on builds running at the same time
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,

    /// Whether to run plugin test suites after building
    #[serde(default = "crate::domains::utils::default_false")]
    pub run_tests: bool,
}

/// A single plugin import key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Import key, e.g. `github.com/acme/widget@v2` or `./bin/widget.so(widget)`
    pub key: String,

    /// Refresh sources and binaries even when they exist on disk
    #[serde(default)]
    pub update: bool,
}

impl PluginEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            update: false,
        }
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            sources_dir: None,
            entries: Vec::new(),
            max_concurrent_builds: default_max_concurrent_builds(),
            run_tests: false,
        }
    }
}

impl PluginsConfig {
    /// Resolved sources directory
    pub fn sources_dir(&self) -> PathBuf {
        self.sources_dir
            .clone()
            .unwrap_or_else(|| self.plugin_dir.join(".sources"))
    }
}

impl Validatable for PluginsConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_path(&self.plugin_dir, "plugin_dir", self.domain_name())?;

        if let Some(ref sources_dir) = self.sources_dir {
            validate_required_path(sources_dir, "sources_dir", self.domain_name())?;
        }

        validate_positive(
            self.max_concurrent_builds,
            "max_concurrent_builds",
            self.domain_name(),
        )?;

        if self.max_concurrent_builds > 64 {
            log::warn!(
                "max_concurrent_builds is {}, builds are CPU heavy and may starve the host",
                self.max_concurrent_builds
            );
        }

        for entry in &self.entries {
            validate_required_string(&entry.key, "entries.key", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "plugins"
    }
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_max_concurrent_builds() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugins_config_defaults() {
        let config = PluginsConfig::default();
        assert_eq!(config.plugin_dir, PathBuf::from("./plugins"));
        assert_eq!(config.sources_dir(), PathBuf::from("./plugins/.sources"));
        assert_eq!(config.max_concurrent_builds, 4);
        assert!(!config.run_tests);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_sources_dir() {
        let config = PluginsConfig {
            sources_dir: Some(PathBuf::from("/var/cache/sprocket")),
            ..Default::default()
        };
        assert_eq!(config.sources_dir(), PathBuf::from("/var/cache/sprocket"));
    }

    #[test]
    fn test_plugins_config_validation() {
        let mut config = PluginsConfig::default();
        config.plugin_dir = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = PluginsConfig::default();
        config.max_concurrent_builds = 0;
        assert!(config.validate().is_err());

        let mut config = PluginsConfig::default();
        config.entries.push(PluginEntry::new(""));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_entry_deserialization() {
        let yaml = r#"
plugin_dir: /opt/plugins
entries:
  - key: github.com/acme/widget@v2
  - key: ./bin/gadget.so(gadget)
    update: true
"#;
        let config: PluginsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.entries[0], PluginEntry::new("github.com/acme/widget@v2"));
        assert!(config.entries[1].update);
        assert_eq!(config.max_concurrent_builds, 4);
    }
}
