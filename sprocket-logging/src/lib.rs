//! Logging infrastructure for Sprocket
//!
//! This crate provides:
//! - tracing subscriber initialisation driven by [`LoggingConfig`]
//! - [`Scribe`], a logger scoped to one plugin alias that tags every event
//!   with its prefix and a [`Severity`]

pub mod error;
pub mod init;
pub mod scribe;
pub mod severity;

// Re-export main types for convenience
pub use error::{LoggingError, LoggingResult};
pub use init::{build_env_filter, init_logging, init_simple_tracing};
pub use scribe::Scribe;
pub use severity::Severity;

pub use sprocket_config::{LogFormat, LoggingConfig};
