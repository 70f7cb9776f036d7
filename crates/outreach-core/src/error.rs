//! Error types for the outreach engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OutreachError>;

#[derive(Debug, Error)]
pub enum OutreachError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl OutreachError {
    /// Whether the error came from a missing record rather than a broken store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OutreachError::NotFound(_))
    }
}
