//! Error types for Stagehand.

use thiserror::Error;

/// Stagehand error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Catalogue or orchestrator configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),

    /// A backend refused to start an operation
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::backend::DispatchError),

    /// Starting or joining a session failed
    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    /// No async runtime available to host the processing loop
    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Stagehand operations.
pub type Result<T> = std::result::Result<T, Error>;
