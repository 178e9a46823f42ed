//! Error types for the autoship agent

use thiserror::Error;

/// Main error type for the autoship agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Watch error: {0}")]
    WatchError(String),

    #[error("Workflow error: {0}")]
    WorkflowError(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl From<notify::Error> for AgentError {
    fn from(err: notify::Error) -> Self {
        AgentError::WatchError(err.to_string())
    }
}

/// A request record that failed structural or safety checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Offending field of the request record
    pub field: &'static str,

    /// Human readable reason
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure of an external collaborator call (proxy, DNS, certificates, status).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Worth retrying: network hiccup, 5xx, resolver cache miss
    #[error("transient failure: {0}")]
    Transient(String),

    /// The provider asked us to back off; retrying makes it worse
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Permanent refusal (bad input, invalid config, auth)
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        CollaboratorError::Transient(err.to_string())
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        CollaboratorError::Transient(err.to_string())
    }
}
