//! Prometheus counters for the customer message pipeline and the `/metrics`
//! scrape endpoint

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::future::Future;
use tokio::net::TcpListener;

lazy_static::lazy_static! {
    pub static ref MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        "customer_messages_received_total",
        "Customer messages received from the queue"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MESSAGES_COMPLETED: IntCounter = register_int_counter!(
        "customer_messages_completed_total",
        "Customer messages stored and acknowledged"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MESSAGES_DEAD_LETTERED: IntCounterVec = register_int_counter_vec!(
        "customer_messages_dead_lettered_total",
        "Customer messages moved to the dead-letter sink",
        &["reason"]
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MESSAGES_ABANDONED: IntCounter = register_int_counter!(
        "customer_messages_abandoned_total",
        "Customer messages handed back for redelivery"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MESSAGES_RELEASED: IntCounter = register_int_counter!(
        "customer_messages_released_total",
        "Customer messages returned to the queue after a failed settlement"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref QUEUE_ERRORS: IntCounter = register_int_counter!(
        "customer_queue_errors_total",
        "Errors reported by the queue client"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref PROCESSING_SECONDS: Histogram = register_histogram!(
        "customer_message_processing_seconds",
        "Time spent processing one customer message",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Everything in the default registry, in the Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve `/metrics` on `listener` until `shutdown` resolves
pub async fn serve_metrics<F>(listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await
}
