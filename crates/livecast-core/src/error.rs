//! Error types for LiveCast.

use thiserror::Error;

/// Main error type for LiveCast operations.
#[derive(Error, Debug)]
pub enum LiveCastError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Shader compilation error: {0}")]
    Shader(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Sink rejected request: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Result type alias for LiveCast operations.
pub type Result<T> = std::result::Result<T, LiveCastError>;
