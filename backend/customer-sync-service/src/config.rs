use db_pool::env_utils::{env_flag, parse_env_or};
use db_pool::DbConfig;
use message_queue::KafkaQueueConfig;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::consumers::HandlerSettings;
use crate::error::ConfigError;

pub const SERVICE_NAME: &str = "customer-sync-service";

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

#[derive(Debug, Clone)]
pub struct Config {
    /// `development`, `production` or `test`
    pub app_env: String,
    pub database: DbConfig,
    pub kafka: KafkaQueueConfig,
    pub handler: HandlerSettings,
    /// Apply embedded migrations at startup
    pub run_migrations: bool,
    /// `/metrics` listener; `None` when `METRICS_ADDR` is set empty
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let database = DbConfig::from_env(SERVICE_NAME).map_err(ConfigError::Invalid)?;

        let brokers =
            env::var("KAFKA_BROKERS").map_err(|_| ConfigError::Missing("KAFKA_BROKERS".into()))?;

        let defaults = KafkaQueueConfig::default();
        let topic = env::var("KAFKA_CUSTOMER_TOPIC").unwrap_or(defaults.topic);
        let dead_letter_topic =
            env::var("KAFKA_DEAD_LETTER_TOPIC").unwrap_or_else(|_| format!("{}.dlq", topic));

        let kafka = KafkaQueueConfig {
            brokers,
            group_id: env::var("KAFKA_CUSTOMER_GROUP_ID").unwrap_or(defaults.group_id),
            topic,
            dead_letter_topic,
            max_delivery_count: parse_env_or(
                "KAFKA_MAX_DELIVERY_COUNT",
                defaults.max_delivery_count,
            )
            .map_err(ConfigError::Invalid)?,
            redelivery_delay: millis("KAFKA_REDELIVERY_DELAY_MS", defaults.redelivery_delay)?,
            receive_timeout: millis("KAFKA_RECEIVE_TIMEOUT_MS", defaults.receive_timeout)?,
            session_timeout_ms: parse_env_or(
                "KAFKA_SESSION_TIMEOUT_MS",
                defaults.session_timeout_ms,
            )
            .map_err(ConfigError::Invalid)?,
            publish_timeout: defaults.publish_timeout,
        };
        kafka
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let handler_defaults = HandlerSettings::default();
        let handler = HandlerSettings {
            shutdown_timeout: Duration::from_secs(
                parse_env_or(
                    "CONSUMER_SHUTDOWN_TIMEOUT_SECS",
                    handler_defaults.shutdown_timeout.as_secs(),
                )
                .map_err(ConfigError::Invalid)?,
            ),
            error_backoff: millis("CONSUMER_ERROR_BACKOFF_MS", handler_defaults.error_backoff)?,
        };

        Ok(Self {
            app_env,
            database,
            kafka,
            handler,
            run_migrations: env_flag("RUN_MIGRATIONS", true),
            metrics_addr: metrics_addr()?,
        })
    }
}

fn metrics_addr() -> Result<Option<SocketAddr>, ConfigError> {
    let raw = env::var("METRICS_ADDR").unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.trim().parse().map(Some).map_err(|_| {
        ConfigError::Invalid(format!("METRICS_ADDR '{}' is not a socket address", raw))
    })
}

fn millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let value = parse_env_or(key, default.as_millis() as u64).map_err(ConfigError::Invalid)?;
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "APP_ENV",
        "DATABASE_URL",
        "TEST_DATABASE_URL",
        "KAFKA_BROKERS",
        "KAFKA_CUSTOMER_TOPIC",
        "KAFKA_CUSTOMER_GROUP_ID",
        "KAFKA_DEAD_LETTER_TOPIC",
        "KAFKA_MAX_DELIVERY_COUNT",
        "KAFKA_REDELIVERY_DELAY_MS",
        "KAFKA_RECEIVE_TIMEOUT_MS",
        "KAFKA_SESSION_TIMEOUT_MS",
        "CONSUMER_SHUTDOWN_TIMEOUT_SECS",
        "CONSUMER_ERROR_BACKOFF_MS",
        "RUN_MIGRATIONS",
        "METRICS_ADDR",
    ];

    fn reset_env() {
        for key in KEYS {
            env::remove_var(key);
        }
        env::set_var("DATABASE_URL", "postgres://localhost/customers");
        env::set_var("KAFKA_BROKERS", "localhost:9092");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.app_env, "development");
        assert_eq!(config.kafka.topic, "customer.events");
        assert_eq!(config.kafka.dead_letter_topic, "customer.events.dlq");
        assert_eq!(config.kafka.group_id, "customer-sync-service");
        assert_eq!(config.kafka.max_delivery_count, 10);
        assert_eq!(config.handler.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.handler.error_backoff, Duration::from_millis(5000));
        assert!(config.run_migrations);
        assert_eq!(config.database.service_name, SERVICE_NAME);
        assert_eq!(
            config.metrics_addr,
            Some("0.0.0.0:9090".parse::<SocketAddr>().unwrap())
        );
    }

    #[test]
    #[serial]
    fn test_metrics_addr() {
        reset_env();
        env::set_var("METRICS_ADDR", "127.0.0.1:9464");
        assert_eq!(
            Config::from_env().unwrap().metrics_addr,
            Some("127.0.0.1:9464".parse::<SocketAddr>().unwrap())
        );

        env::set_var("METRICS_ADDR", "");
        assert_eq!(Config::from_env().unwrap().metrics_addr, None);

        env::set_var("METRICS_ADDR", "port nine thousand");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    #[serial]
    fn test_dead_letter_topic_follows_custom_topic() {
        reset_env();
        env::set_var("KAFKA_CUSTOMER_TOPIC", "crm.customers");
        env::set_var("KAFKA_REDELIVERY_DELAY_MS", "250");
        env::set_var("RUN_MIGRATIONS", "false");

        let config = Config::from_env().unwrap();
        assert_eq!(config.kafka.dead_letter_topic, "crm.customers.dlq");
        assert_eq!(config.kafka.redelivery_delay, Duration::from_millis(250));
        assert!(!config.run_migrations);
    }

    #[test]
    #[serial]
    fn test_missing_brokers() {
        reset_env();
        env::remove_var("KAFKA_BROKERS");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref key) if key == "KAFKA_BROKERS"));
    }

    #[test]
    #[serial]
    fn test_invalid_queue_settings_fail() {
        reset_env();
        env::set_var("KAFKA_MAX_DELIVERY_COUNT", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid(_)
        ));

        reset_env();
        env::set_var("KAFKA_MAX_DELIVERY_COUNT", "ten");
        assert!(Config::from_env().is_err());

        reset_env();
        env::set_var("KAFKA_BROKERS", "");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_test_env_reads_test_database_url() {
        reset_env();
        env::set_var("APP_ENV", "test");
        env::set_var("TEST_DATABASE_URL", "postgres://localhost/customers_test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.app_env, "test");
        assert_eq!(
            config.database.database_url,
            "postgres://localhost/customers_test"
        );
    }
}
