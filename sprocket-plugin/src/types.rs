//! Plugin type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a plugin comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A prebuilt binary on the local filesystem
    LocalBinary,
    /// A repository that is fetched and compiled
    VersionControlled,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalBinary => write!(f, "local binary"),
            Self::VersionControlled => write!(f, "version controlled"),
        }
    }
}

/// Repository coordinates of a version-controlled plugin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Clone URL, e.g. `https://github.com/acme/widget`
    pub url: String,
    /// `host/owner/repo`, used for the on-disk source layout
    pub host_path: String,
    /// Path of the plugin crate inside the repository, if not at its root
    pub subdirectory: Option<String>,
}

/// Immutable result of parsing an import key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub import_key: String,
    pub kind: SourceKind,
    pub alias: String,
    pub location: String,
    pub repository: Option<RepositoryRef>,
    pub revision: Option<String>,
    pub binary_path: PathBuf,
    pub update_requested: bool,
}

/// Lifecycle position of a plugin. Variants are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Parsed,
    Fetched,
    Pinned,
    Built,
    Tested,
    Loaded,
    Closed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed => write!(f, "parsed"),
            Self::Fetched => write!(f, "fetched"),
            Self::Pinned => write!(f, "pinned"),
            Self::Built => write!(f, "built"),
            Self::Tested => write!(f, "tested"),
            Self::Loaded => write!(f, "loaded"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of a registered plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub descriptor: PluginDescriptor,
    pub state: PluginState,
    /// Checkout directory for version-controlled plugins
    pub source_dir: Option<PathBuf>,
    /// Whether this process produced the binary
    pub rebuilt: bool,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl PluginInfo {
    pub fn alias(&self) -> &str {
        &self.descriptor.alias
    }

    pub fn is_loaded(&self) -> bool {
        self.state == PluginState::Loaded
    }
}
