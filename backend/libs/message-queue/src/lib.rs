//! # Message Queue Client Library
//!
//! Broker-neutral receive/acknowledge primitives for a single subscription,
//! with a Kafka backend for production and an in-memory backend for tests.
//!
//! ## Delivery model
//!
//! Delivery is **at-least-once**. A received message ends in exactly one of:
//!
//! - **Complete**: processing succeeded, the message is acknowledged and will
//!   not be delivered again.
//! - **Abandon**: processing failed with a retryable error, the message
//!   becomes visible again and is redelivered. Once its delivery count reaches
//!   the configured maximum the client dead-letters it with
//!   [`DeadLetterReason::MaxDeliveryCountExceeded`].
//! - **Dead-letter**: processing failed permanently, the message is moved to
//!   the dead-letter sink with a reason code and description.
//!
//! ## Architecture
//!
//! ```text
//! Broker → QueueClient::receive → handler → complete / abandon / dead_letter
//!                                                         ↓
//!                                                  dead-letter topic
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use message_queue::{DeadLetterReason, QueueClient};
//!
//! # async fn example(queue: impl QueueClient) -> message_queue::QueueResult<()> {
//! while let Some(message) = queue.receive().await? {
//!     match handle(&message.body).await {
//!         Ok(()) => queue.complete(&message).await?,
//!         Err(e) if e.is_permanent() => {
//!             queue
//!                 .dead_letter(&message, DeadLetterReason::ValidationFailed, &e.to_string())
//!                 .await?
//!         }
//!         Err(_) => {
//!             queue.abandon(&message).await?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Kafka mapping
//!
//! Kafka has no per-message acknowledgement, so the Kafka client maps the
//! primitives onto offsets:
//!
//! - complete → commit `offset + 1` for the partition
//! - abandon → seek the partition back to the message offset
//! - dead-letter → publish the original payload to the dead-letter topic with
//!   reason headers, then commit
//! - release → seek the partition back to the message offset, no delay and no
//!   commit
//!
//! Commits are cumulative per partition, so a message whose settlement failed
//! must be released before anything after it is completed. Otherwise a later
//! commit moves the group position past it.
//!
//! Delivery counts are tracked per consumer instance. A restart resets them,
//! which can only lengthen the retry budget, never drop a message.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;

mod dead_letter;
mod error;
pub mod in_memory;
pub mod kafka;

pub use dead_letter::{dead_letter_headers, DeadLetterPublisher, DeadLetteredMessage};
pub use error::{QueueError, QueueResult};
pub use in_memory::InMemoryQueue;
pub use kafka::{KafkaQueueClient, KafkaQueueConfig};

/// Two-valued failure classification every backend understands.
///
/// Permanent failures are dead-lettered immediately; retryable failures
/// leave the message unacknowledged so it is delivered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Permanent,
    Retryable,
}

impl ErrorClass {
    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorClass::Permanent)
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// Reason code attached to a dead-lettered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// Body could not be decoded into the expected message type
    DeserializationFailed,

    /// Body decoded but violated structural rules
    ValidationFailed,

    /// Message was redelivered until the delivery budget ran out
    MaxDeliveryCountExceeded,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::DeserializationFailed => "DeserializationFailed",
            DeadLetterReason::ValidationFailed => "ValidationFailed",
            DeadLetterReason::MaxDeliveryCountExceeded => "MaxDeliveryCountExceeded",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a message handed back with [`QueueClient::abandon`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonOutcome {
    /// Message will be delivered again
    Redelivering,

    /// Delivery budget exhausted, message moved to the dead-letter sink
    DeadLettered,
}

/// A message delivered to this consumer, detached from the broker client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Raw message body
    pub body: Vec<u8>,

    /// Optional partitioning key
    pub key: Option<Vec<u8>>,

    /// Source topic (or queue name)
    pub topic: String,

    /// Source partition (0 for unpartitioned backends)
    pub partition: i32,

    /// Position of the message within its partition
    pub offset: i64,

    /// How many times this message has been delivered, including this one
    pub delivery_count: u32,
}

impl ReceivedMessage {
    /// Stable identifier for logging: `topic-partition-offset`
    pub fn message_id(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }

    /// Body as text, replacing invalid UTF-8 sequences
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Receive/acknowledge primitives for one subscription.
///
/// Implementations must be safe to share across tasks. Callers keep at most
/// one message in flight per handler; implementations do not enforce it.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Name of the topic/queue this client is subscribed to
    fn subscription(&self) -> &str;

    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived within the client's receive
    /// timeout so callers can check for shutdown between polls.
    async fn receive(&self) -> QueueResult<Option<ReceivedMessage>>;

    /// Acknowledge successful processing
    async fn complete(&self, message: &ReceivedMessage) -> QueueResult<()>;

    /// Give the message back for redelivery, or dead-letter it when the
    /// delivery budget is exhausted
    async fn abandon(&self, message: &ReceivedMessage) -> QueueResult<AbandonOutcome>;

    /// Move the message to the dead-letter sink
    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: DeadLetterReason,
        description: &str,
    ) -> QueueResult<()>;

    /// Hand back a message whose settlement failed so it is the next one
    /// delivered. Does not settle it.
    async fn release(&self, message: &ReceivedMessage) -> QueueResult<()>;
}
