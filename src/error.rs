//! Error types for the Beacon voice client

use thiserror::Error;

/// Result type alias for voice client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake word model error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Daemon returned an unusable response
    #[error("backend error: {0}")]
    Backend(String),

    /// Callback server error
    #[error("callback server error: {0}")]
    Callback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
