//! In-memory customer store.
//!
//! A unit of work buffers its writes and applies them under one lock on
//! commit. It also holds a per-customer lock from `begin` until it is
//! committed or dropped, so units of work for one customer never overlap.
//! Failure injection and counters let tests observe whether the store was
//! touched at all.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

use super::r#trait::{BrandRecord, CustomerRecord, CustomerStore, CustomerUnitOfWork, StoredCustomer};
use crate::error::{StorageError, StorageResult};

#[derive(Default)]
struct StoreState {
    customers: HashMap<i32, CustomerRecord>,
    brands: HashMap<i32, BrandRecord>,
    customer_brands: BTreeSet<(i32, i32)>,
}

impl StoreState {
    fn stored_customer(&self, customer_id: i32) -> Option<StoredCustomer> {
        let customer = self.customers.get(&customer_id)?.clone();
        let brand_ids = self
            .customer_brands
            .range((customer_id, i32::MIN)..=(customer_id, i32::MAX))
            .map(|(_, brand_id)| *brand_id)
            .collect();
        Some(StoredCustomer {
            customer,
            brand_ids,
        })
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<StoreState>,
    customer_locks: Mutex<HashMap<i32, Arc<tokio::sync::Mutex<()>>>>,
    unavailable: AtomicBool,
    failing_commits: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn customer_lock(&self, customer_id: i32) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .customer_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(customer_id).or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCustomerStore {
    shared: Arc<Shared>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a brand directly, bypassing units of work
    pub fn seed_brand(&self, brand_id: i32, name: &str) {
        self.shared.state().brands.insert(
            brand_id,
            BrandRecord {
                brand_id,
                name: name.to_string(),
            },
        );
    }

    /// Make `begin` fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail
    pub fn fail_next_commits(&self, count: usize) {
        self.shared.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Units of work opened so far
    pub fn begin_count(&self) -> usize {
        self.shared.begins.load(Ordering::SeqCst)
    }

    /// Units of work committed so far
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn customer_count(&self) -> usize {
        self.shared.state().customers.len()
    }

    pub fn brand_count(&self) -> usize {
        self.shared.state().brands.len()
    }

    pub fn relation_count(&self) -> usize {
        self.shared.state().customer_brands.len()
    }
}

#[async_trait::async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn begin(&self, customer_id: i32) -> StorageResult<Box<dyn CustomerUnitOfWork>> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        let guard = self.shared.customer_lock(customer_id).lock_owned().await;

        Ok(Box::new(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            _customer_guard: guard,
            customer: None,
            new_brands: Vec::new(),
            relations: None,
        }))
    }

    async fn load_customer(&self, customer_id: i32) -> StorageResult<Option<StoredCustomer>> {
        Ok(self.shared.state().stored_customer(customer_id))
    }

    async fn load_brand(&self, brand_id: i32) -> StorageResult<Option<BrandRecord>> {
        Ok(self.shared.state().brands.get(&brand_id).cloned())
    }
}

struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    _customer_guard: OwnedMutexGuard<()>,
    customer: Option<CustomerRecord>,
    new_brands: Vec<BrandRecord>,
    relations: Option<(i32, Vec<i32>)>,
}

#[async_trait::async_trait]
impl CustomerUnitOfWork for InMemoryUnitOfWork {
    async fn find_customer(&mut self, customer_id: i32) -> StorageResult<Option<StoredCustomer>> {
        let mut stored = self.shared.state().stored_customer(customer_id);

        if let Some(pending) = self.customer.as_ref().filter(|c| c.customer_id == customer_id) {
            let brand_ids = stored.map(|s| s.brand_ids).unwrap_or_default();
            stored = Some(StoredCustomer {
                customer: pending.clone(),
                brand_ids,
            });
        }
        if let (Some(stored), Some((id, brand_ids))) = (stored.as_mut(), self.relations.as_ref()) {
            if *id == customer_id {
                stored.brand_ids = brand_ids.clone();
            }
        }
        Ok(stored)
    }

    async fn find_brand(&mut self, brand_id: i32) -> StorageResult<Option<BrandRecord>> {
        if let Some(brand) = self.new_brands.iter().find(|b| b.brand_id == brand_id) {
            return Ok(Some(brand.clone()));
        }
        Ok(self.shared.state().brands.get(&brand_id).cloned())
    }

    async fn insert_brand(&mut self, brand: &BrandRecord) -> StorageResult<()> {
        if !self.new_brands.iter().any(|b| b.brand_id == brand.brand_id) {
            self.new_brands.push(brand.clone());
        }
        Ok(())
    }

    async fn save_customer(&mut self, customer: &CustomerRecord) -> StorageResult<()> {
        self.customer = Some(customer.clone());
        Ok(())
    }

    async fn replace_customer_brands(
        &mut self,
        customer_id: i32,
        brand_ids: &[i32],
    ) -> StorageResult<()> {
        let mut ids = brand_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        self.relations = Some((customer_id, ids));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let failing = &self.shared.failing_commits;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Commit(
                "injected commit failure".to_string(),
            ));
        }

        let mut state = self.shared.state();

        // Foreign keys are checked before anything is applied
        if let Some((customer_id, brand_ids)) = &self.relations {
            let customer_known = state.customers.contains_key(customer_id)
                || self
                    .customer
                    .as_ref()
                    .is_some_and(|c| c.customer_id == *customer_id);
            if !customer_known {
                return Err(StorageError::Commit(format!(
                    "customer {} does not exist",
                    customer_id
                )));
            }
            let missing = brand_ids.iter().find(|&&id| {
                !state.brands.contains_key(&id)
                    && !self.new_brands.iter().any(|b| b.brand_id == id)
            });
            if let Some(missing) = missing {
                return Err(StorageError::Commit(format!(
                    "brand {} does not exist",
                    missing
                )));
            }
        }

        for brand in &self.new_brands {
            state
                .brands
                .entry(brand.brand_id)
                .or_insert_with(|| brand.clone());
        }

        if let Some(customer) = &self.customer {
            state.customers.insert(customer.customer_id, customer.clone());
        }

        if let Some((customer_id, brand_ids)) = &self.relations {
            let customer_id = *customer_id;
            state
                .customer_brands
                .retain(|(owner, _)| *owner != customer_id);
            for brand_id in brand_ids {
                state.customer_brands.insert((customer_id, *brand_id));
            }
        }

        drop(state);
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
