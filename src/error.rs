//! Error types for micstream.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MicstreamError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Embedded side
    #[error("Microphone failed to start: {message}")]
    CaptureStart { message: String },

    #[error("Microphone capture failed: {message}")]
    Capture { message: String },

    #[error("Notification send failed: {message}")]
    Transport { message: String },

    // Host side
    #[error("Framing error: expected {expected} bytes, got {actual}")]
    Framing { expected: usize, actual: usize },

    #[error("PCM container error: {message}")]
    Container { message: String },

    #[error("Transcription forwarder error: {message}")]
    Forwarder { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, MicstreamError>;
