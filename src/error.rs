//! Error types for the trading assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Core Assistant Errors
    // =============================

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("AI completion failed: {0}")]
    Completion(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Trading backend error: {0}")]
    Backend(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Coin catalog error: {0}")]
    Catalog(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
