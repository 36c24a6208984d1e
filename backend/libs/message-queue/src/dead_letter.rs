//! Dead-letter sink for messages the consumer will not process again.
//!
//! The original payload is republished unchanged to the dead-letter topic;
//! reason code, description and source coordinates travel as headers so an
//! operator can inspect and replay the message.

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error};

use crate::{DeadLetterReason, QueueError, QueueResult, ReceivedMessage};

pub const HEADER_REASON: &str = "dead_letter_reason";
pub const HEADER_DESCRIPTION: &str = "dead_letter_description";
pub const HEADER_ORIGINAL_TOPIC: &str = "original_topic";
pub const HEADER_ORIGINAL_PARTITION: &str = "original_partition";
pub const HEADER_ORIGINAL_OFFSET: &str = "original_offset";
pub const HEADER_DELIVERY_COUNT: &str = "delivery_count";

/// A message as it landed in the dead-letter sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetteredMessage {
    pub message: ReceivedMessage,
    pub reason: DeadLetterReason,
    pub description: String,
}

/// Build the header set attached to a dead-lettered record
pub fn dead_letter_headers(
    message: &ReceivedMessage,
    reason: DeadLetterReason,
    description: &str,
) -> OwnedHeaders {
    let partition = message.partition.to_string();
    let offset = message.offset.to_string();
    let delivery_count = message.delivery_count.to_string();

    OwnedHeaders::new()
        .insert(Header {
            key: HEADER_REASON,
            value: Some(reason.as_str().as_bytes()),
        })
        .insert(Header {
            key: HEADER_DESCRIPTION,
            value: Some(description.as_bytes()),
        })
        .insert(Header {
            key: HEADER_ORIGINAL_TOPIC,
            value: Some(message.topic.as_bytes()),
        })
        .insert(Header {
            key: HEADER_ORIGINAL_PARTITION,
            value: Some(partition.as_bytes()),
        })
        .insert(Header {
            key: HEADER_ORIGINAL_OFFSET,
            value: Some(offset.as_bytes()),
        })
        .insert(Header {
            key: HEADER_DELIVERY_COUNT,
            value: Some(delivery_count.as_bytes()),
        })
}

/// Kafka producer bound to the dead-letter topic
pub struct DeadLetterPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl DeadLetterPublisher {
    pub fn new(brokers: &str, topic: &str, timeout: Duration) -> QueueResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            timeout,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish the message to the dead-letter topic and wait for delivery
    pub async fn publish(
        &self,
        message: &ReceivedMessage,
        reason: DeadLetterReason,
        description: &str,
    ) -> QueueResult<()> {
        let headers = dead_letter_headers(message, reason, description);

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&self.topic)
            .payload(&message.body[..])
            .headers(headers);
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %self.topic,
                    partition = partition,
                    offset = offset,
                    message_id = %message.message_id(),
                    reason = %reason,
                    "Message published to dead-letter topic"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    error = %e,
                    topic = %self.topic,
                    message_id = %message.message_id(),
                    "Failed to publish message to dead-letter topic"
                );
                Err(QueueError::DeadLetterPublish(e.to_string()))
            }
        }
    }
}
