//! Plugin system error types

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::PluginState;

/// Plugin system result type
pub type PluginResult<T> = Result<T, PluginError>;

/// Result type returned by the external collaborators (git, cargo, loader)
pub type ToolResult<T> = Result<T, ToolError>;

/// Plugin system errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// The import key is neither a repository reference nor a loadable binary
    #[error("Plugin type not supported: {key}")]
    UnsupportedKeyKind { key: String },

    /// An alias was opened with `(` but never closed
    #[error("Expected ending parenthesis in key: {key}")]
    ExpectedEndParen { key: String },

    #[error("Plugin with alias '{alias}' already registered")]
    DuplicateAlias { alias: String },

    #[error("Invalid plugin directory: {path:?}")]
    InvalidDirectory { path: PathBuf },

    #[error("Plugin '{alias}' is not loaded")]
    PluginNotLoaded { alias: String },

    /// The destination cannot accept a value (e.g. an initialised `OnceLock`)
    #[error("Destination for plugin '{alias}' is not addressable")]
    NotAddressable { alias: String },

    #[error("Plugin '{alias}' does not export symbol '{symbol}'")]
    SymbolNotFound { alias: String, symbol: &'static str },

    #[error("Plugin '{alias}' exports an incompatible backend: {reason}")]
    SignatureMismatch { alias: String, reason: String },

    #[error("Plugin '{alias}' backend is {found}, which cannot be assigned to {expected}")]
    TypeMismatch {
        alias: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Plugin registry already closed")]
    AlreadyClosed,

    /// A lifecycle step was invoked before its prerequisites were met
    #[error("Plugin '{alias}' cannot {step} while {state}")]
    OutOfOrder {
        alias: String,
        step: &'static str,
        state: PluginState,
    },

    #[error("Plugin '{alias}' binary not found: {path:?}")]
    BinaryNotFound { alias: String, path: PathBuf },

    #[error("{alias} failed test")]
    TestsFailed { alias: String },

    /// A collaborator failed during a lifecycle step
    #[error("Plugin '{alias}' failed to {step}: {source}")]
    Step {
        alias: String,
        step: &'static str,
        #[source]
        source: ToolError,
    },

    #[error("Plugin '{alias}' {step} was cancelled")]
    Cancelled { alias: String, step: &'static str },

    /// A pool task panicked or was aborted
    #[error("Plugin '{alias}' task failed: {reason}")]
    TaskFailed { alias: String, reason: String },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] sprocket_config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Attribute a collaborator failure to a plugin and step
    pub fn step(alias: impl Into<String>, step: &'static str, source: ToolError) -> Self {
        let alias = alias.into();
        match source {
            ToolError::Cancelled => Self::Cancelled { alias, step },
            source => Self::Step {
                alias,
                step,
                source,
            },
        }
    }

    /// Alias of the plugin the error concerns, if any
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::DuplicateAlias { alias }
            | Self::PluginNotLoaded { alias }
            | Self::NotAddressable { alias }
            | Self::SymbolNotFound { alias, .. }
            | Self::SignatureMismatch { alias, .. }
            | Self::TypeMismatch { alias, .. }
            | Self::OutOfOrder { alias, .. }
            | Self::BinaryNotFound { alias, .. }
            | Self::TestsFailed { alias }
            | Self::Step { alias, .. }
            | Self::Cancelled { alias, .. }
            | Self::TaskFailed { alias, .. } => Some(alias),
            _ => None,
        }
    }
}

/// Errors reported by the version control, toolchain and module loader
/// implementations
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{program} {args} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to load module {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The build succeeded but its output could not be located or installed
    #[error("build artifact error: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Every failure of a bulk operation, in plugin order
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<PluginError>,
}

impl AggregateError {
    pub fn new(errors: Vec<PluginError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[PluginError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<PluginError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when nothing failed, otherwise `Err(PluginError::Aggregate)`
    pub fn into_result(self) -> PluginResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Aggregate(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            1 => write!(f, "1 error occurred:")?,
            n => write!(f, "{} errors occurred:", n)?,
        }
        for error in &self.errors {
            write!(f, "\n\t* {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl FromIterator<PluginError> for AggregateError {
    fn from_iter<I: IntoIterator<Item = PluginError>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
