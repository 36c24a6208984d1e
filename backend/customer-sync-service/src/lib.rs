//! Customer sync service
//!
//! Consumes customer change events and keeps a PostgreSQL mirror of each
//! customer, the brand catalog and the customer/brand associations.

pub mod config;
pub mod consumers;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod repository;

pub use consumers::{CustomerEventsHandler, HandlerSettings, ProcessOutcome};
pub use error::{ConfigError, HandlerError, StorageError, StorageResult};
