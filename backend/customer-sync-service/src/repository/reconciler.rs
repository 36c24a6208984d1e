//! Applies one validated customer message to the store.
//!
//! The customer row is upserted, unknown brands are added to the catalog,
//! and the customer's brand associations are replaced with exactly the
//! message's set. Everything happens in the caller's unit of work and
//! becomes visible on commit.

use tracing::{debug, info, warn};

use super::r#trait::{BrandRecord, CustomerRecord, CustomerUnitOfWork};
use crate::domain::ValidatedCustomer;
use crate::error::StorageResult;

/// What a reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Customer row did not exist before
    pub created: bool,
    /// Brands added to the catalog
    pub brands_inserted: usize,
    /// Associations written for the customer
    pub brand_links: usize,
    /// Incoming timestamp was older than the stored one
    pub stale: bool,
}

pub async fn store_customer(
    mut uow: Box<dyn CustomerUnitOfWork>,
    message: &ValidatedCustomer,
) -> StorageResult<ReconcileSummary> {
    let customer_id = message.customer_id;
    let mut summary = ReconcileSummary::default();

    match uow.find_customer(customer_id).await? {
        Some(existing) => {
            if message.last_change_date_time < existing.customer.last_change_date_time {
                summary.stale = true;
                warn!(
                    customer_id = customer_id,
                    stored = %existing.customer.last_change_date_time,
                    incoming = %message.last_change_date_time,
                    "Incoming customer change is older than stored state, applying anyway"
                );
            }
            debug!(
                customer_id = customer_id,
                previous_brands = existing.brand_ids.len(),
                "Updating existing customer"
            );
        }
        None => {
            summary.created = true;
            debug!(customer_id = customer_id, "Creating customer");
        }
    }

    // Duplicate brand ids collapse to the first occurrence
    let mut brand_ids: Vec<i32> = Vec::with_capacity(message.brands.len());
    for brand in &message.brands {
        if brand_ids.contains(&brand.brand_id) {
            continue;
        }
        brand_ids.push(brand.brand_id);

        if uow.find_brand(brand.brand_id).await?.is_none() {
            uow.insert_brand(&BrandRecord {
                brand_id: brand.brand_id,
                name: brand.name.clone(),
            })
            .await?;
            summary.brands_inserted += 1;
        }
    }

    uow.save_customer(&customer_record(message)).await?;
    uow.replace_customer_brands(customer_id, &brand_ids).await?;
    summary.brand_links = brand_ids.len();

    uow.commit().await?;

    info!(
        customer_id = customer_id,
        created = summary.created,
        brands_inserted = summary.brands_inserted,
        brand_links = summary.brand_links,
        "Customer stored"
    );
    Ok(summary)
}

fn customer_record(message: &ValidatedCustomer) -> CustomerRecord {
    CustomerRecord {
        customer_id: message.customer_id,
        name: message.name.clone(),
        customer_type_id: message.customer_type_id,
        customer_type_name: message.customer_type_name.clone(),
        segment_id: message.segment_id,
        country_iso: message.country_iso.clone(),
        currency_iso: message.currency_iso.clone(),
        deleted: message.deleted,
        last_change_date_time: message.last_change_date_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidatedBrand;
    use crate::repository::{CustomerStore, InMemoryCustomerStore};
    use chrono::{TimeZone, Utc};

    fn customer(id: i32, name: &str, brands: &[(i32, &str)]) -> ValidatedCustomer {
        ValidatedCustomer {
            customer_id: id,
            name: name.to_string(),
            customer_type_id: 2,
            customer_type_name: "TestAccount".to_string(),
            segment_id: 10,
            country_iso: "SWE".to_string(),
            currency_iso: "SEK".to_string(),
            deleted: false,
            last_change_date_time: Utc.with_ymd_and_hms(2025, 5, 6, 10, 0, 0).unwrap(),
            brands: brands
                .iter()
                .map(|(brand_id, name)| ValidatedBrand {
                    brand_id: *brand_id,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    async fn apply(store: &InMemoryCustomerStore, message: &ValidatedCustomer) -> ReconcileSummary {
        let uow = store.begin(message.customer_id).await.unwrap();
        store_customer(uow, message).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_customer_with_brand() {
        let store = InMemoryCustomerStore::new();
        let message = customer(101, "Test Customer - New", &[(1, "NewBrand")]);

        let summary = apply(&store, &message).await;
        assert!(summary.created);
        assert_eq!(summary.brands_inserted, 1);
        assert_eq!(summary.brand_links, 1);

        let stored = store.load_customer(101).await.unwrap().unwrap();
        assert_eq!(stored.customer, customer_record(&message));
        assert_eq!(stored.brand_ids, vec![1]);
        assert_eq!(
            store.load_brand(1).await.unwrap().unwrap().name,
            "NewBrand"
        );
    }

    #[tokio::test]
    async fn test_duplicate_brand_ids_collapse() {
        let store = InMemoryCustomerStore::new();
        let message = customer(5, "Dupes", &[(3, "First"), (3, "Second"), (4, "Other")]);

        let summary = apply(&store, &message).await;
        assert_eq!(summary.brands_inserted, 2);
        assert_eq!(summary.brand_links, 2);

        let stored = store.load_customer(5).await.unwrap().unwrap();
        assert_eq!(stored.brand_ids, vec![3, 4]);
        assert_eq!(store.load_brand(3).await.unwrap().unwrap().name, "First");
    }

    #[tokio::test]
    async fn test_stale_update_still_applied() {
        let store = InMemoryCustomerStore::new();
        apply(&store, &customer(9, "Newer", &[])).await;

        let mut older = customer(9, "Older", &[]);
        older.last_change_date_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let summary = apply(&store, &older).await;

        assert!(summary.stale);
        assert!(!summary.created);
        let stored = store.load_customer(9).await.unwrap().unwrap();
        assert_eq!(stored.customer.name, "Older");
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_store_untouched() {
        let store = InMemoryCustomerStore::new();
        store.fail_next_commits(1);

        let uow = store.begin(101).await.unwrap();
        let result = store_customer(uow, &customer(101, "Acme", &[(1, "X")])).await;

        assert!(result.is_err());
        assert_eq!(store.customer_count(), 0);
        assert_eq!(store.brand_count(), 0);
        assert_eq!(store.relation_count(), 0);
    }
}
