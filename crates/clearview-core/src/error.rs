//! Error types for clearview.

use thiserror::Error;

/// Result type alias using clearview's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for clearview operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Call event not found
    #[error("Call not found: {0}")]
    CallNotFound(uuid::Uuid),

    /// Patient not found
    #[error("Patient not found: {0}")]
    PatientNotFound(uuid::Uuid),

    /// Video generation API failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Transactional email delivery failed
    #[error("Email error: {0}")]
    Email(String),

    /// Patient document could not be rendered
    #[error("Document error: {0}")]
    Document(String),

    /// Blob storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Background task error
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
