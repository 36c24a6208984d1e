//! Customer change events consumer
//!
//! Drives one message at a time through decode, validate, store and
//! acknowledge:
//! - undecodable body -> dead-letter `DeserializationFailed`
//! - invalid message -> dead-letter `ValidationFailed`
//! - storage failure -> abandon, redelivered until the queue's delivery
//!   budget runs out
//! - stored -> complete
//!
//! If settling fails the message is released back to the queue before the
//! next receive, so a later acknowledgement never skips it.

use message_queue::{AbandonOutcome, DeadLetterReason, QueueClient, ReceivedMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{validate_customer, CustomerMessage};
use crate::error::HandlerError;
use crate::metrics::{
    MESSAGES_ABANDONED, MESSAGES_COMPLETED, MESSAGES_DEAD_LETTERED, MESSAGES_RECEIVED,
    MESSAGES_RELEASED, PROCESSING_SECONDS, QUEUE_ERRORS,
};
use crate::repository::{store_customer, CustomerStore, ReconcileSummary};

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Upper bound for `stop()` to wait on the in-flight message
    pub shutdown_timeout: Duration,
    /// Pause after a receive error before polling again
    pub error_backoff: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(60),
            error_backoff: Duration::from_millis(5000),
        }
    }
}

/// How a message left the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    DeadLettered(DeadLetterReason),
    Abandoned,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Consumer for customer change events
pub struct CustomerEventsHandler {
    queue: Arc<dyn QueueClient>,
    store: Arc<dyn CustomerStore>,
    settings: HandlerSettings,
    running: Mutex<Option<RunningLoop>>,
}

impl CustomerEventsHandler {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn CustomerStore>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            queue,
            store,
            settings,
            running: Mutex::new(None),
        }
    }

    /// Spawn the receive loop. Returns `false` if it is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!(
                subscription = %self.queue.subscription(),
                "Customer events handler already running"
            );
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handler = Arc::clone(self);
        let task = tokio::spawn(async move { handler.run(shutdown_rx).await });
        *running = Some(RunningLoop { shutdown, task });

        info!(
            subscription = %self.queue.subscription(),
            "Started listening for customer events"
        );
        true
    }

    /// Stop receiving and wait for the in-flight message to finish
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);

        match tokio::time::timeout(self.settings.shutdown_timeout, running.task).await {
            Ok(Ok(())) => info!(
                subscription = %self.queue.subscription(),
                "Stopped listening for customer events"
            ),
            Ok(Err(e)) => error!(error = %e, "Customer events loop terminated abnormally"),
            Err(_) => warn!(
                timeout_secs = self.settings.shutdown_timeout.as_secs(),
                "Timed out waiting for in-flight customer message"
            ),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.queue.receive() => received,
            };

            match received {
                // Not raced against shutdown: the message runs to completion
                Ok(Some(message)) => {
                    if let Err(e) = self.process_message(&message).await {
                        QUEUE_ERRORS.inc();
                        error!(
                            message_id = %message.message_id(),
                            error = %e,
                            "Failed to settle customer message"
                        );
                        // Nothing after this message may be settled until it is back in the queue
                        if !self.release(&message, &mut shutdown).await {
                            break;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    QUEUE_ERRORS.inc();
                    error!(
                        subscription = %self.queue.subscription(),
                        error = %e,
                        "Queue receive error"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }
        debug!("Customer events loop exited");
    }

    /// Hand an unsettled message back to the queue, retrying after each
    /// failure. Returns `false` when shutdown was requested first; the message
    /// then stays unacknowledged and the broker redelivers it after restart.
    async fn release(
        &self,
        message: &ReceivedMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            match self.queue.release(message).await {
                Ok(()) => {
                    MESSAGES_RELEASED.inc();
                    return true;
                }
                Err(e) if e.class().is_permanent() => {
                    warn!(
                        message_id = %message.message_id(),
                        error = %e,
                        "Customer message no longer held by the queue"
                    );
                    return true;
                }
                Err(e) => {
                    QUEUE_ERRORS.inc();
                    error!(
                        message_id = %message.message_id(),
                        error = %e,
                        "Failed to release customer message, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => return false,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }
    }

    /// Process and settle one message.
    ///
    /// `Err` means the queue rejected the settlement; the message was not
    /// acknowledged and the broker will redeliver it.
    pub async fn process_message(
        &self,
        message: &ReceivedMessage,
    ) -> Result<ProcessOutcome, HandlerError> {
        MESSAGES_RECEIVED.inc();
        let timer = PROCESSING_SECONDS.start_timer();
        info!(
            message_id = %message.message_id(),
            delivery_count = message.delivery_count,
            "Customer message received, processing"
        );

        let outcome = match self.apply(message).await {
            Ok(_) => {
                self.queue.complete(message).await?;
                MESSAGES_COMPLETED.inc();
                ProcessOutcome::Completed
            }
            Err(e) => match e.dead_letter_reason() {
                Some(reason) => {
                    warn!(
                        message_id = %message.message_id(),
                        reason = %reason,
                        error = %e,
                        "Invalid customer message, moving to dead-letter"
                    );
                    self.queue.dead_letter(message, reason, &e.to_string()).await?;
                    MESSAGES_DEAD_LETTERED
                        .with_label_values(&[reason.as_str()])
                        .inc();
                    ProcessOutcome::DeadLettered(reason)
                }
                None => {
                    error!(
                        message_id = %message.message_id(),
                        delivery_count = message.delivery_count,
                        error = %e,
                        "Failed to store customer message, abandoning for redelivery"
                    );
                    match self.queue.abandon(message).await? {
                        AbandonOutcome::Redelivering => {
                            MESSAGES_ABANDONED.inc();
                            ProcessOutcome::Abandoned
                        }
                        AbandonOutcome::DeadLettered => {
                            let reason = DeadLetterReason::MaxDeliveryCountExceeded;
                            MESSAGES_DEAD_LETTERED
                                .with_label_values(&[reason.as_str()])
                                .inc();
                            ProcessOutcome::DeadLettered(reason)
                        }
                    }
                }
            },
        };

        timer.observe_duration();
        Ok(outcome)
    }

    async fn apply(&self, message: &ReceivedMessage) -> Result<ReconcileSummary, HandlerError> {
        let decoded = CustomerMessage::decode(&message.body)?;
        let validated = validate_customer(&decoded)
            .map_err(|fields| HandlerError::Validation { fields })?;

        let uow = self.store.begin(validated.customer_id).await?;
        let summary = store_customer(uow, &validated).await?;
        Ok(summary)
    }
}
