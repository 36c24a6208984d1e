//! In-memory queue with the same settlement semantics as the Kafka client.
//!
//! Used by tests and local tooling. Abandoned and released messages go back to
//! the head of the queue, so redelivery order matches a partition rewind.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::dead_letter::DeadLetteredMessage;
use crate::{
    AbandonOutcome, DeadLetterReason, QueueClient, QueueError, QueueResult, ReceivedMessage,
};

#[derive(Default)]
struct QueueState {
    next_offset: i64,
    pending: VecDeque<ReceivedMessage>,
    in_flight: HashMap<i64, ReceivedMessage>,
    completed: Vec<ReceivedMessage>,
    dead_lettered: Vec<DeadLetteredMessage>,
    abandoned: usize,
    released: usize,
    receive_errors: VecDeque<String>,
    dead_letter_errors: VecDeque<String>,
    release_errors: VecDeque<String>,
}

pub struct InMemoryQueue {
    name: String,
    max_delivery_count: u32,
    receive_timeout: Duration,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

impl InMemoryQueue {
    pub fn new(name: &str, max_delivery_count: u32) -> Self {
        Self {
            name: name.to_string(),
            max_delivery_count: max_delivery_count.max(1),
            receive_timeout: Duration::from_millis(50),
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a raw body, returning its offset
    pub fn send(&self, body: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut state = self.state();
            let offset = state.next_offset;
            state.next_offset += 1;
            state.pending.push_back(ReceivedMessage {
                body: body.into(),
                key: None,
                topic: self.name.clone(),
                partition: 0,
                offset,
                delivery_count: 0,
            });
            offset
        };
        self.arrivals.notify_one();
        offset
    }

    /// Enqueue a value serialized as JSON
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<i64, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.send(body))
    }

    /// Make the next `receive` call fail, exercising the error path
    pub fn inject_receive_error(&self, message: &str) {
        self.state().receive_errors.push_back(message.to_string());
        self.arrivals.notify_one();
    }

    /// Make the next `dead_letter` call fail; the message stays in flight
    pub fn inject_dead_letter_error(&self, message: &str) {
        self.state()
            .dead_letter_errors
            .push_back(message.to_string());
    }

    /// Make the next `release` call fail; the message stays in flight
    pub fn inject_release_error(&self, message: &str) {
        self.state().release_errors.push_back(message.to_string());
    }

    pub fn completed(&self) -> Vec<ReceivedMessage> {
        self.state().completed.clone()
    }

    pub fn dead_lettered(&self) -> Vec<DeadLetteredMessage> {
        self.state().dead_lettered.clone()
    }

    pub fn abandoned_count(&self) -> usize {
        self.state().abandoned
    }

    pub fn released_count(&self) -> usize {
        self.state().released
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Number of messages that reached a terminal state
    pub fn settled_count(&self) -> usize {
        let state = self.state();
        state.completed.len() + state.dead_lettered.len()
    }

    /// Poll until `count` messages are settled or `timeout` elapses
    pub async fn wait_for_settled(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.settled_count() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn take_in_flight(&self, message: &ReceivedMessage) -> QueueResult<ReceivedMessage> {
        self.state()
            .in_flight
            .remove(&message.offset)
            .ok_or_else(|| QueueError::UnknownMessage(message.message_id()))
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    fn subscription(&self) -> &str {
        &self.name
    }

    async fn receive(&self) -> QueueResult<Option<ReceivedMessage>> {
        let deadline = Instant::now() + self.receive_timeout;
        loop {
            {
                let mut state = self.state();
                if let Some(error) = state.receive_errors.pop_front() {
                    return Err(QueueError::Receive(error));
                }
                if let Some(mut message) = state.pending.pop_front() {
                    message.delivery_count += 1;
                    state.in_flight.insert(message.offset, message.clone());
                    return Ok(Some(message));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.arrivals.notified()).await;
        }
    }

    async fn complete(&self, message: &ReceivedMessage) -> QueueResult<()> {
        let message = self.take_in_flight(message)?;
        self.state().completed.push(message);
        Ok(())
    }

    async fn abandon(&self, message: &ReceivedMessage) -> QueueResult<AbandonOutcome> {
        if message.delivery_count >= self.max_delivery_count {
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

        let message = self.take_in_flight(message)?;
        {
            let mut state = self.state();
            state.abandoned += 1;
            state.pending.push_front(message);
        }
        self.arrivals.notify_one();
        Ok(AbandonOutcome::Redelivering)
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: DeadLetterReason,
        description: &str,
    ) -> QueueResult<()> {
        if let Some(error) = self.state().dead_letter_errors.pop_front() {
            return Err(QueueError::DeadLetterPublish(error));
        }
        let message = self.take_in_flight(message)?;
        self.state().dead_lettered.push(DeadLetteredMessage {
            message,
            reason,
            description: description.to_string(),
        });
        Ok(())
    }

    async fn release(&self, message: &ReceivedMessage) -> QueueResult<()> {
        if let Some(error) = self.state().release_errors.pop_front() {
            return Err(QueueError::Receive(error));
        }
        let message = self.take_in_flight(message)?;
        {
            let mut state = self.state();
            state.released += 1;
            state.pending.push_front(message);
        }
        self.arrivals.notify_one();
        Ok(())
    }
}
