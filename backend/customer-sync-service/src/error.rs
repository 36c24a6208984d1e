use message_queue::{DeadLetterReason, ErrorClass, QueueError};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures while reading or writing the customer store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures while processing one customer message
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Body is not a decodable customer message
    #[error("Failed to deserialize message: {0}")]
    Decode(#[from] serde_json::Error),

    /// Message decoded but required fields are missing or out of range
    #[error("Validation failed for fields: {}", .fields.join(", "))]
    Validation { fields: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl HandlerError {
    /// Decode and validation failures never succeed on redelivery
    pub fn class(&self) -> ErrorClass {
        match self {
            HandlerError::Decode(_) | HandlerError::Validation { .. } => ErrorClass::Permanent,
            HandlerError::Storage(_) => ErrorClass::Retryable,
            HandlerError::Queue(e) => e.class(),
        }
    }

    /// Dead-letter reason for permanent failures
    pub fn dead_letter_reason(&self) -> Option<DeadLetterReason> {
        match self {
            HandlerError::Decode(_) => Some(DeadLetterReason::DeserializationFailed),
            HandlerError::Validation { .. } => Some(DeadLetterReason::ValidationFailed),
            _ => None,
        }
    }
}

/// Startup configuration problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
