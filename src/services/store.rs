//! Storage seams for customers and import jobs.
//!
//! `CustomerStore` and `JobStore` are the only ways the services touch
//! persistence. `PgCustomerStore` / `PgJobStore` (in `db::queries`) back
//! them in production; the in-memory stores here serve `--dry-run` imports
//! and tests.
//!
//! Both traits are object-safe so callers can hold `Arc<dyn ...>`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::types::{
    AddressDetails, AddressInput, CandidateRecord, City, Country, Customer, CustomerDetails,
    CustomerRecord, FamilyLink, FamilyMember, ImportJob,
};

/// Errors raised by store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Unique constraint violation, or a write to a finished job
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Sorting
// =============================================================================

/// Column a customer listing can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Id,
    Name,
    NicNumber,
    DateOfBirth,
    CreatedAt,
}

impl SortColumn {
    /// Map a client-supplied key; unknown keys sort by id
    pub fn from_key(key: &str) -> Self {
        match key {
            "name" => SortColumn::Name,
            "nicNumber" | "nic_number" => SortColumn::NicNumber,
            "dateOfBirth" | "date_of_birth" => SortColumn::DateOfBirth,
            "createdAt" | "created_at" => SortColumn::CreatedAt,
            _ => SortColumn::Id,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortColumn::Id => "id",
            SortColumn::Name => "name",
            SortColumn::NicNumber => "nic_number",
            SortColumn::DateOfBirth => "date_of_birth",
            SortColumn::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomerSort {
    pub column: SortColumn,
    pub descending: bool,
}

impl CustomerSort {
    pub fn new(sort_by: &str, direction: &str) -> Self {
        Self {
            column: SortColumn::from_key(sort_by),
            descending: direction.eq_ignore_ascii_case("desc"),
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Customer persistence
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn exists_by_nic(&self, nic_number: &str) -> Result<bool, StoreError>;

    async fn find_by_nic(&self, nic_number: &str) -> Result<Option<Customer>, StoreError>;

    async fn find_details(&self, id: i64) -> Result<Option<CustomerDetails>, StoreError>;

    /// Insert or replace one customer together with its nested collections
    async fn save_one(&self, record: CustomerRecord) -> Result<CustomerDetails, StoreError>;

    /// Insert a batch of imported customers in one all-or-nothing call
    async fn save_batch(&self, batch: &[CandidateRecord]) -> Result<(), StoreError>;

    /// Page of customers without a parent, plus the total count
    async fn list_top_level(
        &self,
        sort: CustomerSort,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CustomerDetails>, i64), StoreError>;

    async fn find_city(&self, id: i64) -> Result<Option<City>, StoreError>;

    async fn list_cities(&self) -> Result<Vec<City>, StoreError>;

    async fn list_countries(&self) -> Result<Vec<Country>, StoreError>;
}

/// Import job persistence, keyed by job id
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &ImportJob) -> Result<(), StoreError>;

    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>, StoreError>;

    /// Overwrite a job; fails with `Conflict` once the stored job is terminal
    async fn update_job(&self, job: &ImportJob) -> Result<(), StoreError>;
}

// =============================================================================
// InMemoryCustomerStore
// =============================================================================

#[derive(Debug, Clone)]
struct StoredCustomer {
    customer: Customer,
    mobile_numbers: Vec<String>,
    addresses: Vec<(i64, AddressInput)>,
}

#[derive(Debug, Clone, Default)]
struct CustomerTables {
    customers: BTreeMap<i64, StoredCustomer>,
    nic_index: HashMap<String, i64>,
    last_customer_id: i64,
    last_address_id: i64,
    cities: Vec<City>,
    countries: Vec<Country>,
}

impl CustomerTables {
    fn insert_customer(
        &mut self,
        name: &str,
        date_of_birth: chrono::NaiveDate,
        nic_number: &str,
        parent_customer_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        if self.nic_index.contains_key(nic_number) {
            return Err(duplicate_nic(nic_number));
        }

        self.last_customer_id += 1;
        let id = self.last_customer_id;
        let now = Utc::now();
        self.customers.insert(id, StoredCustomer {
            customer: Customer {
                id,
                name: name.to_string(),
                date_of_birth,
                nic_number: nic_number.to_string(),
                parent_customer_id,
                created_at: now,
                updated_at: now,
            },
            mobile_numbers: Vec::new(),
            addresses: Vec::new(),
        });
        self.nic_index.insert(nic_number.to_string(), id);
        Ok(id)
    }

    fn details(&self, id: i64) -> Option<CustomerDetails> {
        let stored = self.customers.get(&id)?;
        let addresses = stored
            .addresses
            .iter()
            .map(|(address_id, input)| {
                let city = self.cities.iter().find(|c| c.id == input.city_id);
                AddressDetails {
                    id: *address_id,
                    address_line1: input.address_line1.clone(),
                    address_line2: input.address_line2.clone(),
                    city_id: input.city_id,
                    city_name: city.map(|c| c.name.clone()).unwrap_or_default(),
                    country_name: city.map(|c| c.country_name.clone()).unwrap_or_default(),
                }
            })
            .collect();
        let family_members = self
            .customers
            .values()
            .filter(|c| c.customer.parent_customer_id == Some(id))
            .map(|c| FamilyMember {
                family_member_name: c.customer.name.clone(),
                nic_number: c.customer.nic_number.clone(),
                date_of_birth: c.customer.date_of_birth,
            })
            .collect();

        let c = &stored.customer;
        Some(CustomerDetails {
            id: c.id,
            name: c.name.clone(),
            date_of_birth: c.date_of_birth,
            nic_number: c.nic_number.clone(),
            mobile_numbers: stored.mobile_numbers.clone(),
            addresses,
            family_members,
            created_at: c.created_at,
            updated_at: c.updated_at,
        })
    }

    fn write(&mut self, record: CustomerRecord) -> Result<i64, StoreError> {
        let id = match record.id {
            None => self.insert_customer(
                &record.name,
                record.date_of_birth,
                &record.nic_number,
                None,
            )?,
            Some(id) => {
                if let Some(&owner) = self.nic_index.get(&record.nic_number) {
                    if owner != id {
                        return Err(duplicate_nic(&record.nic_number));
                    }
                }
                let stored = self
                    .customers
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::NotFound(format!("Customer not found with id: {}", id)))?;
                let old_nic = std::mem::replace(&mut stored.customer.nic_number, record.nic_number.clone());
                stored.customer.name = record.name.clone();
                stored.customer.date_of_birth = record.date_of_birth;
                stored.customer.updated_at = Utc::now();
                self.nic_index.remove(&old_nic);
                self.nic_index.insert(record.nic_number.clone(), id);
                id
            }
        };

        for address in &record.addresses {
            if !self.cities.iter().any(|c| c.id == address.city_id) {
                return Err(StoreError::NotFound(format!("City not found with id: {}", address.city_id)));
            }
        }
        let mut addresses = Vec::with_capacity(record.addresses.len());
        for address in record.addresses {
            self.last_address_id += 1;
            addresses.push((self.last_address_id, address));
        }
        if let Some(stored) = self.customers.get_mut(&id) {
            stored.mobile_numbers = record.mobile_numbers;
            stored.addresses = addresses;
        }

        if let Some(links) = record.family_members {
            for stored in self.customers.values_mut() {
                if stored.customer.parent_customer_id == Some(id) {
                    stored.customer.parent_customer_id = None;
                }
            }
            for link in links {
                match link {
                    FamilyLink::Existing(member_id) => {
                        let member = self.customers.get_mut(&member_id).ok_or_else(|| {
                            StoreError::NotFound(format!("Customer not found with id: {}", member_id))
                        })?;
                        member.customer.parent_customer_id = Some(id);
                    }
                    FamilyLink::New(member) => {
                        self.insert_customer(
                            &member.family_member_name,
                            member.date_of_birth,
                            &member.nic_number,
                            Some(id),
                        )?;
                    }
                }
            }
        }

        Ok(id)
    }
}

fn duplicate_nic(nic_number: &str) -> StoreError {
    StoreError::Conflict(format!("Customer with NIC {} already exists", nic_number))
}

/// Customer store held entirely in memory.
///
/// Writes are staged on a copy of the tables and swapped in on success, so a
/// failed `save_one` or `save_batch` leaves no partial state behind.
#[derive(Debug, Default)]
pub struct InMemoryCustomerStore {
    tables: RwLock<CustomerTables>,
    batch_sizes: Mutex<Vec<usize>>,
    fail_next_batch: AtomicBool,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed reference data; cities carry their country name
    #[cfg(test)]
    pub fn with_reference_data(countries: Vec<Country>, cities: Vec<City>) -> Self {
        let store = Self::default();
        {
            let mut tables = store.tables.write();
            tables.countries = countries;
            tables.cities = cities;
        }
        store
    }

    /// Sizes of every `save_batch` call, in call order
    #[cfg(test)]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Make the next `save_batch` call fail
    #[cfg(test)]
    pub fn fail_next_batch(&self) {
        self.fail_next_batch.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn customer_count(&self) -> usize {
        self.tables.read().customers.len()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn exists_by_nic(&self, nic_number: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().nic_index.contains_key(nic_number))
    }

    async fn find_by_nic(&self, nic_number: &str) -> Result<Option<Customer>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .nic_index
            .get(nic_number)
            .and_then(|id| tables.customers.get(id))
            .map(|stored| stored.customer.clone()))
    }

    async fn find_details(&self, id: i64) -> Result<Option<CustomerDetails>, StoreError> {
        Ok(self.tables.read().details(id))
    }

    async fn save_one(&self, record: CustomerRecord) -> Result<CustomerDetails, StoreError> {
        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        let id = staged.write(record)?;
        *tables = staged;
        tables
            .details(id)
            .ok_or_else(|| StoreError::NotFound(format!("Customer not found with id: {}", id)))
    }

    async fn save_batch(&self, batch: &[CandidateRecord]) -> Result<(), StoreError> {
        self.batch_sizes.lock().push(batch.len());
        if self.fail_next_batch.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("batch insert rejected".to_string()));
        }

        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        for record in batch {
            staged.insert_customer(&record.name, record.date_of_birth, &record.nic_number, None)?;
        }
        *tables = staged;
        Ok(())
    }

    async fn list_top_level(
        &self,
        sort: CustomerSort,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CustomerDetails>, i64), StoreError> {
        let tables = self.tables.read();
        let mut top: Vec<&Customer> = tables
            .customers
            .values()
            .map(|stored| &stored.customer)
            .filter(|c| c.parent_customer_id.is_none())
            .collect();

        top.sort_by(|a, b| {
            let ordering = match sort.column {
                SortColumn::Id => a.id.cmp(&b.id),
                SortColumn::Name => a.name.cmp(&b.name),
                SortColumn::NicNumber => a.nic_number.cmp(&b.nic_number),
                SortColumn::DateOfBirth => a.date_of_birth.cmp(&b.date_of_birth),
                SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            if sort.descending { ordering.reverse() } else { ordering }
        });

        let total = top.len() as i64;
        let items = top
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .filter_map(|c| tables.details(c.id))
            .collect();
        Ok((items, total))
    }

    async fn find_city(&self, id: i64) -> Result<Option<City>, StoreError> {
        Ok(self.tables.read().cities.iter().find(|c| c.id == id).cloned())
    }

    async fn list_cities(&self) -> Result<Vec<City>, StoreError> {
        Ok(self.tables.read().cities.clone())
    }

    async fn list_countries(&self) -> Result<Vec<Country>, StoreError> {
        Ok(self.tables.read().countries.clone())
    }
}

// =============================================================================
// InMemoryJobStore
// =============================================================================

/// Job store held in memory; readers get cloned snapshots
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ImportJob>>,
    updates: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `update_job` calls so far
    #[cfg(test)]
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::Conflict(format!("Job {} already exists", job.job_id)));
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>, StoreError> {
        Ok(self.jobs.read().get(job_id).cloned())
    }

    async fn update_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let stored = jobs
            .get_mut(&job.job_id)
            .ok_or_else(|| StoreError::NotFound(format!("Job not found with id: {}", job.job_id)))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(format!("Job {} is already finished", job.job_id)));
        }
        *stored = job.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dob() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 3, 15).unwrap()
    }

    fn candidate(nic: &str) -> CandidateRecord {
        CandidateRecord {
            name: format!("Customer {}", nic),
            date_of_birth: dob(),
            nic_number: nic.to_string(),
        }
    }

    fn record(nic: &str) -> CustomerRecord {
        CustomerRecord {
            id: None,
            name: "Nimal Perera".to_string(),
            date_of_birth: dob(),
            nic_number: nic.to_string(),
            mobile_numbers: vec!["0771234567".to_string()],
            addresses: vec![],
            family_members: None,
        }
    }

    #[test]
    fn test_sort_column_falls_back_to_id() {
        assert_eq!(SortColumn::from_key("nicNumber"), SortColumn::NicNumber);
        assert_eq!(SortColumn::from_key("password"), SortColumn::Id);
        assert!(CustomerSort::new("name", "DESC").descending);
        assert!(!CustomerSort::new("name", "asc").descending);
    }

    #[tokio::test]
    async fn test_save_batch_is_all_or_nothing() {
        let store = InMemoryCustomerStore::new();
        store.save_batch(&[candidate("A")]).await.unwrap();

        let result = store.save_batch(&[candidate("B"), candidate("A")]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(!store.exists_by_nic("B").await.unwrap());
        assert_eq!(store.customer_count(), 1);
        assert_eq!(store.batch_sizes(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fail_next_batch_fails_once() {
        let store = InMemoryCustomerStore::new();
        store.fail_next_batch();
        assert!(store.save_batch(&[candidate("A")]).await.is_err());
        assert!(store.save_batch(&[candidate("A")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_one_links_family_members_by_parent_id() {
        let store = InMemoryCustomerStore::new();
        let standalone = store.save_one(record("CHILD-1")).await.unwrap();

        let mut parent = record("PARENT");
        parent.family_members = Some(vec![
            FamilyLink::Existing(standalone.id),
            FamilyLink::New(FamilyMember {
                family_member_name: "New Child".to_string(),
                nic_number: "CHILD-2".to_string(),
                date_of_birth: dob(),
            }),
        ]);
        let saved = store.save_one(parent).await.unwrap();

        assert_eq!(saved.family_members.len(), 2);
        let child = store.find_by_nic("CHILD-2").await.unwrap().unwrap();
        assert_eq!(child.parent_customer_id, Some(saved.id));

        let (top, total) = store
            .list_top_level(CustomerSort::new("id", "asc"), 10, 0)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(top[0].nic_number, "PARENT");
    }

    #[tokio::test]
    async fn test_job_store_refuses_updates_after_terminal_state() {
        let store = InMemoryJobStore::new();
        let mut job = ImportJob::new("job-1");
        store.create_job(&job).await.unwrap();

        job.status = crate::types::ImportJobStatus::Completed;
        store.update_job(&job).await.unwrap();

        job.status = crate::types::ImportJobStatus::Failed;
        let result = store.update_job(&job).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.update_count(), 1);
    }
}
