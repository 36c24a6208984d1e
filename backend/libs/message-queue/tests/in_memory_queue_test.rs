//! Settlement semantics of the in-memory queue backend

use message_queue::{AbandonOutcome, DeadLetterReason, InMemoryQueue, QueueClient, QueueError};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_messages_are_received_in_send_order() {
    let queue = InMemoryQueue::new("customer.events", 5);
    let first = queue.send("first");
    let second = queue.send("second");

    let a = queue.receive().await.unwrap().unwrap();
    let b = queue.receive().await.unwrap().unwrap();

    assert_eq!(a.offset, first);
    assert_eq!(b.offset, second);
    assert_eq!(a.body_text(), "first");
    assert_eq!(a.delivery_count, 1);
    assert_eq!(queue.in_flight_count(), 2);
}

#[tokio::test]
async fn test_abandon_redelivers_same_message_first() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.send("retry me");
    queue.send("next");

    let message = queue.receive().await.unwrap().unwrap();
    let outcome = queue.abandon(&message).await.unwrap();
    assert_eq!(outcome, AbandonOutcome::Redelivering);

    let again = queue.receive().await.unwrap().unwrap();
    assert_eq!(again.offset, message.offset);
    assert_eq!(again.delivery_count, 2);
    assert_eq!(queue.abandoned_count(), 1);
}

#[tokio::test]
async fn test_abandon_dead_letters_when_budget_exhausted() {
    let queue = InMemoryQueue::new("customer.events", 2);
    queue.send("poison");

    let first = queue.receive().await.unwrap().unwrap();
    assert_eq!(
        queue.abandon(&first).await.unwrap(),
        AbandonOutcome::Redelivering
    );

    let second = queue.receive().await.unwrap().unwrap();
    assert_eq!(
        queue.abandon(&second).await.unwrap(),
        AbandonOutcome::DeadLettered
    );

    let dead = queue.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliveryCountExceeded);
    assert_eq!(dead[0].message.delivery_count, 2);
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(queue.in_flight_count(), 0);
}

#[tokio::test]
async fn test_dead_letter_keeps_reason_and_description() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.send_json(&json!({ "CustomerId": 0 })).unwrap();

    let message = queue.receive().await.unwrap().unwrap();
    queue
        .dead_letter(&message, DeadLetterReason::ValidationFailed, "CustomerId")
        .await
        .unwrap();

    let dead = queue.dead_lettered();
    assert_eq!(dead[0].reason, DeadLetterReason::ValidationFailed);
    assert_eq!(dead[0].description, "CustomerId");
    assert_eq!(dead[0].message.body, message.body);
    assert!(queue.completed().is_empty());
}

#[tokio::test]
async fn test_settling_twice_is_rejected() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.send("once");

    let message = queue.receive().await.unwrap().unwrap();
    queue.complete(&message).await.unwrap();

    let err = queue
        .dead_letter(&message, DeadLetterReason::ValidationFailed, "late")
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::UnknownMessage(_)));
    assert!(err.class().is_permanent());
}

#[tokio::test]
async fn test_release_after_failed_dead_letter_redelivers_first() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.send("not json");
    queue.send("next");

    let message = queue.receive().await.unwrap().unwrap();
    queue.inject_dead_letter_error("dead-letter topic unavailable");
    assert!(queue
        .dead_letter(&message, DeadLetterReason::DeserializationFailed, "bad body")
        .await
        .is_err());

    queue.release(&message).await.unwrap();
    assert_eq!(queue.released_count(), 1);
    assert_eq!(queue.abandoned_count(), 0);

    let again = queue.receive().await.unwrap().unwrap();
    assert_eq!(again.offset, message.offset);
    assert_eq!(again.delivery_count, 2);

    queue
        .dead_letter(&again, DeadLetterReason::DeserializationFailed, "bad body")
        .await
        .unwrap();
    assert_eq!(queue.dead_lettered().len(), 1);
    assert_eq!(queue.pending_count(), 1);
}

#[tokio::test]
async fn test_release_of_unknown_message_is_rejected() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.send("once");
    let message = queue.receive().await.unwrap().unwrap();
    queue.complete(&message).await.unwrap();

    let err = queue.release(&message).await.unwrap_err();
    assert!(matches!(err, QueueError::UnknownMessage(_)));
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test]
async fn test_injected_receive_error_is_returned_once() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.inject_receive_error("broker unavailable");
    queue.send("after error");

    let err = queue.receive().await.unwrap_err();
    assert!(matches!(err, QueueError::Receive(_)));
    assert!(err.class().is_retryable());

    let message = queue.receive().await.unwrap().unwrap();
    assert_eq!(message.body_text(), "after error");
}

#[tokio::test]
async fn test_receive_wakes_on_send() {
    let queue = std::sync::Arc::new(InMemoryQueue::new("customer.events", 5));
    let producer = queue.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        producer.send("late arrival");
    });

    let mut received = None;
    for _ in 0..20 {
        if let Some(message) = queue.receive().await.unwrap() {
            received = Some(message);
            break;
        }
    }
    assert_eq!(received.unwrap().body_text(), "late arrival");
}

#[tokio::test]
async fn test_wait_for_settled() {
    let queue = InMemoryQueue::new("customer.events", 5);
    queue.send("a");
    assert!(!queue.wait_for_settled(1, Duration::from_millis(30)).await);

    let message = queue.receive().await.unwrap().unwrap();
    queue.complete(&message).await.unwrap();
    assert!(queue.wait_for_settled(1, Duration::from_millis(30)).await);
    assert_eq!(queue.settled_count(), 1);
}
