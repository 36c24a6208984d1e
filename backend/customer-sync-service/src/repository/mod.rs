mod in_memory_repository;
mod postgres_repository;
mod reconciler;
mod r#trait;

pub use in_memory_repository::InMemoryCustomerStore;
pub use postgres_repository::{PostgresCustomerStore, PostgresUnitOfWork};
pub use r#trait::{BrandRecord, CustomerRecord, CustomerStore, CustomerUnitOfWork, StoredCustomer};
pub use reconciler::{store_customer, ReconcileSummary};
