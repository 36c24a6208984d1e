//! Pool gauges and transaction-start timing, labelled by service

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::{Duration, Instant};

lazy_static::lazy_static! {
    static ref POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Pooled connections by state (idle, active, max)",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref BEGIN_SECONDS: HistogramVec = register_histogram_vec!(
        "db_pool_begin_duration_seconds",
        "Time from requesting a connection to an open transaction",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref BEGIN_FAILURES: IntCounterVec = register_int_counter_vec!(
        "db_pool_connection_errors_total",
        "Transactions that could not be started, by cause",
        &["service", "error_type"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Point-in-time connection counts for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolSnapshot {
    pub size: u32,
    pub idle: u32,
    pub max: u32,
}

impl PoolSnapshot {
    pub fn capture(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle() as u32,
            max: pool.options().get_max_connections(),
        }
    }

    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle)
    }

    pub fn record(&self, service: &str) {
        for (state, value) in [
            ("idle", self.idle),
            ("active", self.active()),
            ("max", self.max),
        ] {
            POOL_CONNECTIONS
                .with_label_values(&[service, state])
                .set(i64::from(value));
        }
    }
}

/// Refresh the pool gauges every `period` until the pool is closed
pub(crate) fn spawn_pool_gauges(pool: PgPool, service: String, period: Duration) {
    PoolSnapshot::capture(&pool).record(&service);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            PoolSnapshot::capture(&pool).record(&service);
        }
    });
}

fn failure_cause(error: &sqlx::Error) -> &'static str {
    match error {
        sqlx::Error::PoolTimedOut => "timeout",
        sqlx::Error::PoolClosed => "closed",
        sqlx::Error::Io(_) => "io",
        sqlx::Error::Database(_) => "database",
        _ => "other",
    }
}

/// `pool.begin()` with the wait recorded under `service`
pub async fn begin_with_metrics(
    pool: &PgPool,
    service: &str,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let started = Instant::now();
    let result = pool.begin().await;
    BEGIN_SECONDS
        .with_label_values(&[service])
        .observe(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        BEGIN_FAILURES
            .with_label_values(&[service, failure_cause(e)])
            .inc();
    }
    result
}
