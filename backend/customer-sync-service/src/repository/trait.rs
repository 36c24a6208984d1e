use chrono::{DateTime, Utc};

use crate::error::StorageResult;

/// Persisted customer row
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CustomerRecord {
    pub customer_id: i32,
    pub name: String,
    pub customer_type_id: i32,
    pub customer_type_name: String,
    pub segment_id: i32,
    pub country_iso: String,
    pub currency_iso: String,
    pub deleted: bool,
    pub last_change_date_time: DateTime<Utc>,
}

/// Brand catalog entry, shared across customers
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BrandRecord {
    pub brand_id: i32,
    pub name: String,
}

/// A customer row together with its current brand associations
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCustomer {
    pub customer: CustomerRecord,
    /// Associated brand ids, ascending
    pub brand_ids: Vec<i32>,
}

/// Store that hands out one unit of work per message
#[async_trait::async_trait]
pub trait CustomerStore: Send + Sync {
    /// Open a unit of work for reconciling `customer_id`.
    ///
    /// Units of work for the same customer are serialized: `begin` waits until
    /// the previous one for that customer is committed or dropped.
    async fn begin(&self, customer_id: i32) -> StorageResult<Box<dyn CustomerUnitOfWork>>;

    /// Read committed state for one customer
    async fn load_customer(&self, customer_id: i32) -> StorageResult<Option<StoredCustomer>>;

    /// Read committed state for one brand
    async fn load_brand(&self, brand_id: i32) -> StorageResult<Option<BrandRecord>>;
}

/// Reads and writes for one customer, applied together on `commit`.
///
/// Dropping a unit of work without committing discards its writes.
#[async_trait::async_trait]
pub trait CustomerUnitOfWork: Send {
    async fn find_customer(&mut self, customer_id: i32) -> StorageResult<Option<StoredCustomer>>;

    async fn find_brand(&mut self, brand_id: i32) -> StorageResult<Option<BrandRecord>>;

    /// Insert a brand that does not exist yet; an existing row is left as is
    async fn insert_brand(&mut self, brand: &BrandRecord) -> StorageResult<()>;

    /// Insert or overwrite the customer row
    async fn save_customer(&mut self, customer: &CustomerRecord) -> StorageResult<()>;

    /// Replace the customer's brand associations with exactly `brand_ids`
    async fn replace_customer_brands(
        &mut self,
        customer_id: i32,
        brand_ids: &[i32],
    ) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
