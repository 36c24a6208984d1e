//! Kafka-backed queue client
//!
//! Auto-commit is disabled: an offset is committed only after the message is
//! completed or dead-lettered, so a crash mid-processing redelivers it.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dead_letter::DeadLetterPublisher;
use crate::{
    AbandonOutcome, DeadLetterReason, QueueClient, QueueError, QueueResult, ReceivedMessage,
};

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaQueueConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    pub dead_letter_topic: String,
    /// Deliveries allowed before a failing message is dead-lettered
    pub max_delivery_count: u32,
    /// Pause before an abandoned message is made visible again
    pub redelivery_delay: Duration,
    /// Upper bound for a single `receive` poll
    pub receive_timeout: Duration,
    pub session_timeout_ms: u32,
    /// Delivery timeout for dead-letter publishes
    pub publish_timeout: Duration,
}

impl Default for KafkaQueueConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "customer-sync-service".to_string(),
            topic: "customer.events".to_string(),
            dead_letter_topic: "customer.events.dlq".to_string(),
            max_delivery_count: 10,
            redelivery_delay: Duration::from_millis(1000),
            receive_timeout: Duration::from_millis(1000),
            session_timeout_ms: 45000,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaQueueConfig {
    pub fn validate(&self) -> QueueResult<()> {
        if self.brokers.trim().is_empty() {
            return Err(QueueError::InvalidConfig(
                "Kafka brokers cannot be empty".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(QueueError::InvalidConfig(
                "Kafka topic cannot be empty".to_string(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(QueueError::InvalidConfig(
                "Kafka consumer group cannot be empty".to_string(),
            ));
        }
        if self.dead_letter_topic.trim().is_empty() || self.dead_letter_topic == self.topic {
            return Err(QueueError::InvalidConfig(format!(
                "Dead-letter topic must be set and differ from '{}'",
                self.topic
            )));
        }
        if self.max_delivery_count == 0 {
            return Err(QueueError::InvalidConfig(
                "Max delivery count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

type DeliveryKey = (String, i32, i64);

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue client over a Kafka consumer group subscription
pub struct KafkaQueueClient {
    consumer: StreamConsumer,
    dead_letters: DeadLetterPublisher,
    config: KafkaQueueConfig,
    delivery_counts: Mutex<HashMap<DeliveryKey, u32>>,
}

impl KafkaQueueClient {
    pub fn new(config: KafkaQueueConfig) -> QueueResult<Self> {
        config.validate()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", "300000")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        let dead_letters = DeadLetterPublisher::new(
            &config.brokers,
            &config.dead_letter_topic,
            config.publish_timeout,
        )?;

        info!(
            topic = %config.topic,
            group = %config.group_id,
            dead_letter_topic = %config.dead_letter_topic,
            max_delivery_count = config.max_delivery_count,
            "Created Kafka queue client"
        );

        Ok(Self {
            consumer,
            dead_letters,
            config,
            delivery_counts: Mutex::new(HashMap::new()),
        })
    }

    fn record_delivery(&self, topic: &str, partition: i32, offset: i64) -> u32 {
        let mut counts = self
            .delivery_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = counts
            .entry((topic.to_string(), partition, offset))
            .or_insert(0);
        *count += 1;
        *count
    }

    fn forget_delivery(&self, message: &ReceivedMessage) {
        let mut counts = self
            .delivery_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.remove(&(message.topic.clone(), message.partition, message.offset));
    }

    /// Make `message` the next one delivered from its partition
    fn rewind(&self, message: &ReceivedMessage) -> QueueResult<()> {
        self.consumer.seek(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset),
            SEEK_TIMEOUT,
        )?;
        Ok(())
    }

    fn commit(&self, message: &ReceivedMessage) -> QueueResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        self.forget_delivery(message);
        Ok(())
    }
}

#[async_trait]
impl QueueClient for KafkaQueueClient {
    fn subscription(&self) -> &str {
        &self.config.topic
    }

    async fn receive(&self) -> QueueResult<Option<ReceivedMessage>> {
        let message = match tokio::time::timeout(self.config.receive_timeout, self.consumer.recv())
            .await
        {
            Err(_) => return Ok(None),
            Ok(result) => result?,
        };

        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();
        let body = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let key = message.key().map(<[u8]>::to_vec);
        let delivery_count = self.record_delivery(&topic, partition, offset);

        debug!(
            topic = %topic,
            partition = partition,
            offset = offset,
            delivery_count = delivery_count,
            "Received Kafka message"
        );

        Ok(Some(ReceivedMessage {
            body,
            key,
            topic,
            partition,
            offset,
            delivery_count,
        }))
    }

    async fn complete(&self, message: &ReceivedMessage) -> QueueResult<()> {
        self.commit(message)
    }

    async fn abandon(&self, message: &ReceivedMessage) -> QueueResult<AbandonOutcome> {
        if message.delivery_count >= self.config.max_delivery_count {
            warn!(
                message_id = %message.message_id(),
                delivery_count = message.delivery_count,
                max_delivery_count = self.config.max_delivery_count,
                "Delivery budget exhausted, dead-lettering message"
            );
            let description = format!(
                "Message was delivered {} times without being completed",
                message.delivery_count
            );
            self.dead_letter(
                message,
                DeadLetterReason::MaxDeliveryCountExceeded,
                &description,
            )
            .await?;
            return Ok(AbandonOutcome::DeadLettered);
        }

        tokio::time::sleep(self.config.redelivery_delay).await;
        self.rewind(message)?;

        debug!(
            message_id = %message.message_id(),
            delivery_count = message.delivery_count,
            "Message abandoned for redelivery"
        );
        Ok(AbandonOutcome::Redelivering)
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: DeadLetterReason,
        description: &str,
    ) -> QueueResult<()> {
        self.dead_letters
            .publish(message, reason, description)
            .await?;
        self.commit(message)
    }

    async fn release(&self, message: &ReceivedMessage) -> QueueResult<()> {
        self.rewind(message)?;
        warn!(
            message_id = %message.message_id(),
            delivery_count = message.delivery_count,
            "Unsettled message released for redelivery"
        );
        Ok(())
    }
}
