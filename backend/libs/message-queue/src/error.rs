//! Error types for the message queue library

use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::ErrorClass;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by queue clients
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker client failure (receive, commit, seek)
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Receive failed for a backend-specific reason
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Publishing to the dead-letter sink failed; the original message stays
    /// unacknowledged
    #[error("Dead-letter publish failed: {0}")]
    DeadLetterPublish(String),

    /// Settlement requested for a message this client does not hold in flight
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    /// Client configuration rejected at construction time
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

impl QueueError {
    /// Configuration problems never heal on their own; everything else is a
    /// broker or network condition worth retrying.
    pub fn class(&self) -> ErrorClass {
        match self {
            QueueError::InvalidConfig(_) | QueueError::UnknownMessage(_) => ErrorClass::Permanent,
            _ => ErrorClass::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            QueueError::InvalidConfig("empty brokers".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            QueueError::Receive("timeout".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            QueueError::DeadLetterPublish("broker down".into()).class(),
            ErrorClass::Retryable
        );
    }
}
