//! Logging initialisation errors

use thiserror::Error;

pub type LoggingResult<T> = Result<T, LoggingError>;

#[derive(Error, Debug)]
pub enum LoggingError {
    /// The level or `RUST_LOG` directive could not be parsed
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },
}
