use anyhow::{Context, Result};
use customer_sync_service::config::{Config, SERVICE_NAME};
use customer_sync_service::metrics;
use customer_sync_service::repository::PostgresCustomerStore;
use customer_sync_service::CustomerEventsHandler;
use message_queue::KafkaQueueClient;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting Customer Sync Service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        app_env = %config.app_env,
        topic = %config.kafka.topic,
        group = %config.kafka.group_id,
        dead_letter_topic = %config.kafka.dead_letter_topic,
        max_delivery_count = config.kafka.max_delivery_count,
        "Configuration loaded"
    );

    config.database.log_config();
    let pool = db_pool::create_pool(config.database.clone())
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    let store = PostgresCustomerStore::new(pool.clone());
    store
        .health_check()
        .await
        .context("PostgreSQL health check failed")?;

    let (metrics_shutdown, metrics_stop) = tokio::sync::oneshot::channel::<()>();
    let metrics_server = match config.metrics_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
            info!(%addr, "Serving Prometheus metrics on /metrics");
            Some(tokio::spawn(metrics::serve_metrics(listener, async move {
                let _ = metrics_stop.await;
            })))
        }
        None => None,
    };

    let queue = KafkaQueueClient::new(config.kafka.clone())
        .context("Failed to create Kafka queue client")?;

    let handler = Arc::new(CustomerEventsHandler::new(
        Arc::new(queue),
        Arc::new(store),
        config.handler.clone(),
    ));
    handler.start().await;

    shutdown_signal().await;
    info!("Shutdown signal received, stopping {}", SERVICE_NAME);

    handler.stop().await;
    let _ = metrics_shutdown.send(());
    if let Some(server) = metrics_server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Metrics server failed"),
            Err(e) => warn!(error = %e, "Metrics server task panicked"),
        }
    }
    pool.close().await;

    info!("Customer Sync Service stopped");
    Ok(())
}

/// JSON logs when `LOG_FORMAT=json`, human-readable otherwise
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "customer_sync_service=info,message_queue=info,db_pool=info,info".into()
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
