//! Per-plugin logger

use std::fmt::Display;
use std::sync::Arc;

use crate::severity::Severity;

/// Logger scoped to a prefix, normally a plugin alias.
///
/// Every message becomes a `tracing` event under the `plugin` target with
/// `prefix` and `severity` fields, so subscribers can filter or render plugin
/// progress without parsing message text.
#[derive(Debug, Clone)]
pub struct Scribe {
    prefix: Arc<str>,
}

impl Scribe {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: Arc::from(prefix.as_ref()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn notify(&self, message: impl Display) {
        self.log(Severity::Notify, message);
    }

    pub fn success(&self, message: impl Display) {
        self.log(Severity::Success, message);
    }

    pub fn warning(&self, message: impl Display) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(Severity::Error, message);
    }

    pub fn log(&self, severity: Severity, message: impl Display) {
        let prefix = &*self.prefix;
        match severity {
            Severity::Notify | Severity::Success => {
                tracing::info!(target: "plugin", prefix, severity = %severity, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(target: "plugin", prefix, severity = %severity, "{}", message)
            }
            Severity::Error => {
                tracing::error!(target: "plugin", prefix, severity = %severity, "{}", message)
            }
        }
    }
}
