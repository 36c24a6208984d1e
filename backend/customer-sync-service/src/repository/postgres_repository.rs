use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::r#trait::{BrandRecord, CustomerRecord, CustomerStore, CustomerUnitOfWork, StoredCustomer};
use crate::config::SERVICE_NAME;
use crate::error::{StorageError, StorageResult};

/// Advisory lock namespace for per-customer reconciliation
const CUSTOMER_LOCK_NAMESPACE: i32 = 0x4353_5943;

const SELECT_CUSTOMER: &str = r#"
    SELECT customer_id, name, customer_type_id, customer_type_name, segment_id,
           country_iso, currency_iso, deleted, last_change_date_time
    FROM customers
    WHERE customer_id = $1
"#;

const SELECT_CUSTOMER_BRAND_IDS: &str =
    "SELECT brand_id FROM customer_brands WHERE customer_id = $1 ORDER BY brand_id";

const SELECT_BRAND: &str = "SELECT brand_id, name FROM brands WHERE brand_id = $1";

/// PostgreSQL-backed customer store
#[derive(Clone)]
pub struct PostgresCustomerStore {
    pool: PgPool,
}

impl PostgresCustomerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check
    pub async fn health_check(&self) -> StorageResult<bool> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl CustomerStore for PostgresCustomerStore {
    async fn begin(&self, customer_id: i32) -> StorageResult<Box<dyn CustomerUnitOfWork>> {
        let mut tx = db_pool::begin_with_metrics(&self.pool, SERVICE_NAME).await?;

        // Held until commit or rollback
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(CUSTOMER_LOCK_NAMESPACE)
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    async fn load_customer(&self, customer_id: i32) -> StorageResult<Option<StoredCustomer>> {
        let customer = sqlx::query_as::<_, CustomerRecord>(SELECT_CUSTOMER)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(customer) = customer else {
            return Ok(None);
        };

        let brand_ids = sqlx::query_scalar::<_, i32>(SELECT_CUSTOMER_BRAND_IDS)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(StoredCustomer {
            customer,
            brand_ids,
        }))
    }

    async fn load_brand(&self, brand_id: i32) -> StorageResult<Option<BrandRecord>> {
        let brand = sqlx::query_as::<_, BrandRecord>(SELECT_BRAND)
            .bind(brand_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(brand)
    }
}

/// One transaction per message; rolled back when dropped uncommitted
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl CustomerUnitOfWork for PostgresUnitOfWork {
    async fn find_customer(&mut self, customer_id: i32) -> StorageResult<Option<StoredCustomer>> {
        let customer = sqlx::query_as::<_, CustomerRecord>(SELECT_CUSTOMER)
            .bind(customer_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(customer) = customer else {
            return Ok(None);
        };

        let brand_ids = sqlx::query_scalar::<_, i32>(SELECT_CUSTOMER_BRAND_IDS)
            .bind(customer_id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(Some(StoredCustomer {
            customer,
            brand_ids,
        }))
    }

    async fn find_brand(&mut self, brand_id: i32) -> StorageResult<Option<BrandRecord>> {
        let brand = sqlx::query_as::<_, BrandRecord>(SELECT_BRAND)
            .bind(brand_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(brand)
    }

    async fn insert_brand(&mut self, brand: &BrandRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO brands (brand_id, name)
            VALUES ($1, $2)
            ON CONFLICT (brand_id) DO NOTHING
            "#,
        )
        .bind(brand.brand_id)
        .bind(&brand.name)
        .execute(&mut *self.tx)
        .await?;

        debug!(brand_id = brand.brand_id, "Inserted brand");
        Ok(())
    }

    async fn save_customer(&mut self, customer: &CustomerRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (
                customer_id, name, customer_type_id, customer_type_name, segment_id,
                country_iso, currency_iso, deleted, last_change_date_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (customer_id) DO UPDATE SET
                name = EXCLUDED.name,
                customer_type_id = EXCLUDED.customer_type_id,
                customer_type_name = EXCLUDED.customer_type_name,
                segment_id = EXCLUDED.segment_id,
                country_iso = EXCLUDED.country_iso,
                currency_iso = EXCLUDED.currency_iso,
                deleted = EXCLUDED.deleted,
                last_change_date_time = EXCLUDED.last_change_date_time
            "#,
        )
        .bind(customer.customer_id)
        .bind(&customer.name)
        .bind(customer.customer_type_id)
        .bind(&customer.customer_type_name)
        .bind(customer.segment_id)
        .bind(&customer.country_iso)
        .bind(&customer.currency_iso)
        .bind(customer.deleted)
        .bind(customer.last_change_date_time)
        .execute(&mut *self.tx)
        .await?;

        debug!(customer_id = customer.customer_id, "Upserted customer");
        Ok(())
    }

    async fn replace_customer_brands(
        &mut self,
        customer_id: i32,
        brand_ids: &[i32],
    ) -> StorageResult<()> {
        sqlx::query("DELETE FROM customer_brands WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&mut *self.tx)
            .await?;

        if !brand_ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO customer_brands (customer_id, brand_id)
                SELECT $1, brand_id FROM UNNEST($2::int4[]) AS t(brand_id)
                ON CONFLICT (customer_id, brand_id) DO NOTHING
                "#,
            )
            .bind(customer_id)
            .bind(brand_ids)
            .execute(&mut *self.tx)
            .await?;
        }

        debug!(
            customer_id = customer_id,
            brands = brand_ids.len(),
            "Replaced customer brand associations"
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::Commit(e.to_string()))
    }
}
