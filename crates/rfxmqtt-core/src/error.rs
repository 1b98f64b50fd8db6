//! Error types for rfxmqtt

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy shared by every component
#[derive(Error, Debug)]
pub enum Error {
    /// Broker or transceiver connection failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or unsupported command or event
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Snapshot read/write failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid topic or topic pattern
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}
