//! Environment variable parsing utilities
//!
//! Lenient helpers fall back to a default on a missing or malformed value;
//! strict helpers report the offending variable instead.

use std::str::FromStr;

/// Parse an environment variable with a default fallback
///
/// # Example
/// ```ignore
/// let max: u32 = parse_env_with_default("DB_MAX_CONNECTIONS", 10);
/// ```
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse an environment variable, using `default` only when it is unset.
///
/// A value that is present but does not parse is an error.
pub fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(value) => safe_parse(value.trim())
            .map_err(|_| format!("Invalid value for {}: '{}'", key, value)),
        Err(_) => Ok(default),
    }
}

/// Parse a required environment variable
///
/// # Example
/// ```ignore
/// let brokers = parse_env_required::<String>("KAFKA_BROKERS")?;
/// ```
pub fn parse_env_required<T: FromStr>(key: &str) -> Result<T, String> {
    std::env::var(key)
        .map_err(|_| format!("Environment variable {} not found", key))?
        .parse()
        .map_err(|_| format!("Failed to parse environment variable {}", key))
}

/// Read a boolean flag (`true`/`false`/`1`/`0`/`yes`/`no`)
pub fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse a string value without unwrap
pub fn safe_parse<T: FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Failed to parse value: {}", value))
}
