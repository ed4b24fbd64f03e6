//! Domain-driven configuration management for Sprocket
//!
//! Configuration is split by functional domain (plugins, tooling, logging),
//! loaded from YAML with `SPROCKET_*` environment overrides and validated per
//! domain.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    plugins::{PluginEntry, PluginsConfig},
    tooling::ToolingConfig,
    SprocketConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
