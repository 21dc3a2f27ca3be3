//! Error types for probe tasks
//!
//! Every layer reports failures through this single enum.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Probe task error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("Invalid option {name}: {message}")]
    InvalidOption { name: String, message: String },

    // ========================================================================
    // Session & backends
    // ========================================================================
    #[error("Session error: {0}")]
    Session(String),

    #[error("Location lookup failed: {0}")]
    Location(String),

    #[error("Backend lookup failed: {0}")]
    Backend(String),

    #[error("Collector error: {0}")]
    Collector(String),

    #[error("Orchestra error: {0}")]
    Orchestra(String),

    // ========================================================================
    // Execution
    // ========================================================================
    #[error("Experiment failed: {0}")]
    Experiment(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error happened while validating startup settings
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Validation(_)
                | Error::UnknownExperiment(_)
                | Error::InvalidOption { .. }
        )
    }

    /// Invalid option helper
    pub fn invalid_option(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidOption {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
