//! Domain-specific configuration modules

pub mod logging;
pub mod plugins;
pub mod tooling;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Sprocket configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SprocketConfig {
    /// Plugin directories and the plugins to manage
    #[serde(default)]
    pub plugins: plugins::PluginsConfig,

    /// External tools used to fetch, build and test plugins
    #[serde(default)]
    pub tooling: tooling::ToolingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl SprocketConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.plugins.validate()?;
        self.tooling.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = SprocketConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
