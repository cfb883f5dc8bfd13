use crate::config::ConfigError;
use crate::tool::ToolError;
use thiserror::Error;

/// Errors raised while handling one trigger invocation
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Invalid trigger event: {0}")]
    InvalidEvent(String),

    #[error("Tool invocation failed: {0}")]
    Tool(#[from] ToolError),

    #[error("Failed to upload {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Key-value store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, TriggerError>;
