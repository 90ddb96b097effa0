//! Customer CRUD and reference data lookups

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::store::{CustomerSort, CustomerStore, StoreError};
use crate::types::{
    AddressInput, City, Country, CustomerDetails, CustomerPayload, CustomerRecord, FamilyLink,
    FamilyMember, ListRequest, ListResponse,
};

/// Largest page a list request may ask for
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("Customer not found with id: {0}")]
    NotFound(i64),
    #[error("Customer with NIC {0} already exists")]
    DuplicateNic(String),
    #[error("{0}")]
    Validation(String),
    #[error("City not found with id: {0}")]
    CityNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CustomerError {
    /// Error code used in NATS error replies
    pub fn code(&self) -> &'static str {
        match self {
            CustomerError::NotFound(_) | CustomerError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            CustomerError::DuplicateNic(_) | CustomerError::Store(StoreError::Conflict(_)) => "DUPLICATE_NIC",
            CustomerError::Validation(_) | CustomerError::CityNotFound(_) => "VALIDATION_ERROR",
            CustomerError::Store(_) => "DATABASE_ERROR",
        }
    }
}

pub struct CustomerService {
    store: Arc<dyn CustomerStore>,
}

impl CustomerService {
    pub fn new(store: Arc<dyn CustomerStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, payload: CustomerPayload) -> Result<CustomerDetails, CustomerError> {
        let payload = normalize(payload)?;

        if self.store.exists_by_nic(&payload.nic_number).await? {
            return Err(CustomerError::DuplicateNic(payload.nic_number));
        }

        let family = self
            .resolve_family(None, &payload.nic_number, payload.family_members.as_deref())
            .await?;
        let addresses = payload.addresses.clone().unwrap_or_default();
        self.check_cities(&addresses).await?;

        let saved = self.store.save_one(into_record(None, payload, addresses, family)).await?;
        info!("Created customer {} with NIC {}", saved.id, saved.nic_number);
        Ok(saved)
    }

    pub async fn get(&self, id: i64) -> Result<CustomerDetails, CustomerError> {
        self.store
            .find_details(id)
            .await?
            .ok_or(CustomerError::NotFound(id))
    }

    /// Replace a customer's fields, mobile numbers and addresses.
    ///
    /// Family links are replaced only when `family_members` is present.
    pub async fn update(&self, id: i64, payload: CustomerPayload) -> Result<CustomerDetails, CustomerError> {
        let payload = normalize(payload)?;

        if self.store.find_details(id).await?.is_none() {
            return Err(CustomerError::NotFound(id));
        }

        if let Some(owner) = self.store.find_by_nic(&payload.nic_number).await? {
            if owner.id != id {
                return Err(CustomerError::DuplicateNic(payload.nic_number));
            }
        }

        let family = self
            .resolve_family(Some(id), &payload.nic_number, payload.family_members.as_deref())
            .await?;
        let addresses = payload.addresses.clone().unwrap_or_default();
        self.check_cities(&addresses).await?;

        let saved = self.store.save_one(into_record(Some(id), payload, addresses, family)).await?;
        info!("Updated customer {}", id);
        Ok(saved)
    }

    /// Page of top-level customers. Page sizes above `MAX_PAGE_SIZE` are clamped.
    pub async fn list(&self, request: &ListRequest) -> Result<ListResponse<CustomerDetails>, CustomerError> {
        let page = request.page.max(0);
        let size = if request.size > 0 {
            request.size.min(MAX_PAGE_SIZE)
        } else {
            ListRequest::default().size
        };
        let offset = page
            .checked_mul(size)
            .ok_or_else(|| CustomerError::Validation(format!("Page {} is out of range", page)))?;
        let sort = CustomerSort::new(&request.sort_by, &request.sort_direction);

        let (items, total) = self.store.list_top_level(sort, size, offset).await?;
        debug!("Listed {} of {} customers (page {})", items.len(), total, page);

        Ok(ListResponse { items, total, page, size })
    }

    pub async fn cities(&self) -> Result<Vec<City>, CustomerError> {
        Ok(self.store.list_cities().await?)
    }

    pub async fn countries(&self) -> Result<Vec<Country>, CustomerError> {
        Ok(self.store.list_countries().await?)
    }

    /// Validate family members and decide how each one is linked.
    ///
    /// A member whose NIC is already stored is linked as a child when it has
    /// no parent yet or already belongs to `parent_id`.
    async fn resolve_family(
        &self,
        parent_id: Option<i64>,
        parent_nic: &str,
        members: Option<&[FamilyMember]>,
    ) -> Result<Option<Vec<FamilyLink>>, CustomerError> {
        let Some(members) = members else {
            return Ok(None);
        };

        let mut seen = HashSet::new();
        let mut links = Vec::with_capacity(members.len());

        for member in members {
            if member.family_member_name.trim().is_empty() {
                return Err(CustomerError::Validation("Family member name is required".to_string()));
            }
            let nic = member.nic_number.trim();
            if nic.is_empty() {
                return Err(CustomerError::Validation("Family member NIC number is required".to_string()));
            }
            if nic == parent_nic {
                return Err(CustomerError::Validation(format!(
                    "Family member NIC {} is the customer's own NIC",
                    nic
                )));
            }
            if !seen.insert(nic.to_string()) {
                return Err(CustomerError::Validation(format!(
                    "Family member NIC {} is listed more than once",
                    nic
                )));
            }

            match self.store.find_by_nic(nic).await? {
                Some(existing) => {
                    let linkable = existing.parent_customer_id.is_none()
                        || (parent_id.is_some() && existing.parent_customer_id == parent_id);
                    if !linkable {
                        return Err(CustomerError::DuplicateNic(nic.to_string()));
                    }
                    links.push(FamilyLink::Existing(existing.id));
                }
                None => links.push(FamilyLink::New(FamilyMember {
                    family_member_name: member.family_member_name.trim().to_string(),
                    nic_number: nic.to_string(),
                    date_of_birth: member.date_of_birth,
                })),
            }
        }

        Ok(Some(links))
    }

    async fn check_cities(&self, addresses: &[AddressInput]) -> Result<(), CustomerError> {
        for address in addresses {
            if address.address_line1.trim().is_empty() {
                return Err(CustomerError::Validation("Address line 1 is required".to_string()));
            }
            if self.store.find_city(address.city_id).await?.is_none() {
                return Err(CustomerError::CityNotFound(address.city_id));
            }
        }
        Ok(())
    }
}

/// Trim identifying fields and reject blanks
fn normalize(mut payload: CustomerPayload) -> Result<CustomerPayload, CustomerError> {
    payload.name = payload.name.trim().to_string();
    payload.nic_number = payload.nic_number.trim().to_string();

    if payload.name.is_empty() {
        return Err(CustomerError::Validation("Name is required".to_string()));
    }
    if payload.nic_number.is_empty() {
        return Err(CustomerError::Validation("NIC number is required".to_string()));
    }
    Ok(payload)
}

fn into_record(
    id: Option<i64>,
    payload: CustomerPayload,
    addresses: Vec<AddressInput>,
    family_members: Option<Vec<FamilyLink>>,
) -> CustomerRecord {
    let mobile_numbers = payload
        .mobile_numbers
        .unwrap_or_default()
        .into_iter()
        .map(|number| number.trim().to_string())
        .filter(|number| !number.is_empty())
        .collect();

    CustomerRecord {
        id,
        name: payload.name,
        date_of_birth: payload.date_of_birth,
        nic_number: payload.nic_number,
        mobile_numbers,
        addresses,
        family_members,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryCustomerStore;
    use chrono::NaiveDate;

    fn service() -> (Arc<InMemoryCustomerStore>, CustomerService) {
        let store = Arc::new(InMemoryCustomerStore::with_reference_data(
            vec![Country { id: 1, name: "Sri Lanka".to_string() }],
            vec![City {
                id: 10,
                name: "Colombo".to_string(),
                country_id: 1,
                country_name: "Sri Lanka".to_string(),
            }],
        ));
        let service = CustomerService::new(store.clone());
        (store, service)
    }

    fn dob() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 3, 15).unwrap()
    }

    fn payload(name: &str, nic: &str) -> CustomerPayload {
        CustomerPayload {
            name: name.to_string(),
            date_of_birth: dob(),
            nic_number: nic.to_string(),
            mobile_numbers: None,
            addresses: None,
            family_members: None,
        }
    }

    fn member(name: &str, nic: &str) -> FamilyMember {
        FamilyMember {
            family_member_name: name.to_string(),
            nic_number: nic.to_string(),
            date_of_birth: dob(),
        }
    }

    #[tokio::test]
    async fn test_create_with_collections() {
        let (_, service) = service();
        let mut request = payload("Nimal Perera", "900751234V");
        request.mobile_numbers = Some(vec!["0771234567".to_string(), "  ".to_string()]);
        request.addresses = Some(vec![AddressInput {
            address_line1: "12 Galle Road".to_string(),
            address_line2: None,
            city_id: 10,
        }]);

        let created = service.create(request).await.unwrap();
        assert_eq!(created.mobile_numbers, vec!["0771234567".to_string()]);
        assert_eq!(created.addresses.len(), 1);
        assert_eq!(created.addresses[0].city_name, "Colombo");
        assert_eq!(created.addresses[0].country_name, "Sri Lanka");

        let fetched = service.get(created.id).await.unwrap();
        assert_eq!(fetched.nic_number, "900751234V");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_nic() {
        let (_, service) = service();
        service.create(payload("First", "900751234V")).await.unwrap();

        let result = service.create(payload("Second", "900751234V")).await;
        let err = result.unwrap_err();
        assert!(matches!(err, CustomerError::DuplicateNic(_)));
        assert_eq!(err.code(), "DUPLICATE_NIC");
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name_and_unknown_city() {
        let (_, service) = service();
        let result = service.create(payload("   ", "900751234V")).await;
        assert!(matches!(result, Err(CustomerError::Validation(_))));

        let mut request = payload("Nimal", "900751234V");
        request.addresses = Some(vec![AddressInput {
            address_line1: "1 Main Street".to_string(),
            address_line2: None,
            city_id: 99,
        }]);
        let result = service.create(request).await;
        assert!(matches!(result, Err(CustomerError::CityNotFound(99))));
    }

    #[tokio::test]
    async fn test_family_member_validation() {
        let (_, service) = service();

        let mut own_nic = payload("Parent", "P1");
        own_nic.family_members = Some(vec![member("Child", "P1")]);
        assert!(matches!(service.create(own_nic).await, Err(CustomerError::Validation(_))));

        let mut repeated = payload("Parent", "P1");
        repeated.family_members = Some(vec![member("Child", "C1"), member("Twin", "C1")]);
        assert!(matches!(service.create(repeated).await, Err(CustomerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_existing_customer_is_linked_as_child() {
        let (store, service) = service();
        let standalone = service.create(payload("Kamala", "C1")).await.unwrap();

        let mut parent = payload("Parent", "P1");
        parent.family_members = Some(vec![member("Kamala", "C1"), member("Sunil", "C2")]);
        let created = service.create(parent).await.unwrap();

        assert_eq!(created.family_members.len(), 2);
        let child = store.find_by_nic("C1").await.unwrap().unwrap();
        assert_eq!(child.id, standalone.id);
        assert_eq!(child.parent_customer_id, Some(created.id));

        // A child of someone else cannot be claimed by another parent
        let mut other = payload("Other Parent", "P2");
        other.family_members = Some(vec![member("Kamala", "C1")]);
        assert!(matches!(service.create(other).await, Err(CustomerError::DuplicateNic(_))));
    }

    #[tokio::test]
    async fn test_update_keeps_family_when_absent() {
        let (_, service) = service();
        let mut parent = payload("Parent", "P1");
        parent.family_members = Some(vec![member("Child", "C1")]);
        let created = service.create(parent).await.unwrap();

        let updated = service.update(created.id, payload("Parent Renamed", "P1")).await.unwrap();
        assert_eq!(updated.name, "Parent Renamed");
        assert_eq!(updated.family_members.len(), 1);

        // Own children may be listed again on update
        let mut again = payload("Parent Renamed", "P1");
        again.family_members = Some(vec![member("Child", "C1")]);
        let updated = service.update(created.id, again).await.unwrap();
        assert_eq!(updated.family_members.len(), 1);

        let mut cleared = payload("Parent Renamed", "P1");
        cleared.family_members = Some(vec![]);
        let updated = service.update(created.id, cleared).await.unwrap();
        assert!(updated.family_members.is_empty());
    }

    #[tokio::test]
    async fn test_update_errors() {
        let (_, service) = service();
        let first = service.create(payload("First", "N1")).await.unwrap();
        service.create(payload("Second", "N2")).await.unwrap();

        let result = service.update(first.id, payload("First", "N2")).await;
        assert!(matches!(result, Err(CustomerError::DuplicateNic(_))));

        let err = service.update(999, payload("Ghost", "N9")).await.unwrap_err();
        assert!(matches!(err, CustomerError::NotFound(999)));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_pages_top_level_customers() {
        let (_, service) = service();
        for (name, nic) in [("Charlie", "N3"), ("Alice", "N1"), ("Bob", "N2")] {
            service.create(payload(name, nic)).await.unwrap();
        }
        let mut parent = payload("Dana", "N4");
        parent.family_members = Some(vec![member("Dana Junior", "N5")]);
        service.create(parent).await.unwrap();

        let request = ListRequest {
            page: 0,
            size: 2,
            sort_by: "name".to_string(),
            sort_direction: "DESC".to_string(),
        };
        let page = service.list(&request).await.unwrap();
        assert_eq!(page.total, 4);
        let names: Vec<&str> = page.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Dana", "Charlie"]);

        let second = service.list(&ListRequest { page: 1, ..request }).await.unwrap();
        let names: Vec<&str> = second.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Alice"]);
    }

    #[tokio::test]
    async fn test_list_rejects_page_beyond_offset_range() {
        let (_, service) = service();
        let request = ListRequest { page: i64::MAX, ..ListRequest::default() };

        let err = service.list(&request).await.unwrap_err();
        assert!(matches!(err, CustomerError::Validation(_)));
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_list_clamps_oversized_page_size() {
        let (_, service) = service();
        service.create(payload("Alice", "N1")).await.unwrap();

        let request = ListRequest { size: 1_000_000_000, ..ListRequest::default() };
        let page = service.list(&request).await.unwrap();
        assert_eq!(page.size, MAX_PAGE_SIZE);
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_reference_lists() {
        let (_, service) = service();
        assert_eq!(service.cities().await.unwrap().len(), 1);
        assert_eq!(service.countries().await.unwrap()[0].name, "Sri Lanka");
    }

    #[test]
    fn test_store_conflict_maps_to_duplicate_code() {
        let err = CustomerError::from(StoreError::Conflict("dup".to_string()));
        assert_eq!(err.code(), "DUPLICATE_NIC");
        let err = CustomerError::from(StoreError::Unavailable("down".to_string()));
        assert_eq!(err.code(), "DATABASE_ERROR");
    }
}
