//! Severity of scribe messages

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a plugin lifecycle message should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Progress, e.g. a step starting
    Notify,
    /// A step completed
    Success,
    /// Something the user should look at, not fatal
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Notify => "notify",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    /// tracing level the message is emitted at
    pub fn level(&self) -> tracing::Level {
        match self {
            Severity::Notify | Severity::Success => tracing::Level::INFO,
            Severity::Warning => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
