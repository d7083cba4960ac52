//! Error types for the IRC state tracker

use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message parsing error: {0}")]
    MessageParse(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused or never completed registration
    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Event delivery error: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid mention pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
