//! Customer types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Customer entity (row of `customers`)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub nic_number: String,
    /// Set when this customer is a family member of another customer
    pub parent_customer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Customer as returned to clients, with nested collections resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub id: i64,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub nic_number: String,
    pub mobile_numbers: Vec<String>,
    pub addresses: Vec<AddressDetails>,
    pub family_members: Vec<FamilyMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Address with its city and country names
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AddressDetails {
    pub id: i64,
    #[sqlx(rename = "address_line_1")]
    pub address_line1: String,
    #[sqlx(rename = "address_line_2")]
    pub address_line2: Option<String>,
    pub city_id: i64,
    pub city_name: String,
    pub country_name: String,
}

/// Family member entry as exchanged with clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub family_member_name: String,
    pub nic_number: String,
    pub date_of_birth: NaiveDate,
}

/// Address input on create/update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city_id: i64,
}

/// Request to create a customer (also the body of an update)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub nic_number: String,
    pub mobile_numbers: Option<Vec<String>>,
    pub addresses: Option<Vec<AddressInput>>,
    pub family_members: Option<Vec<FamilyMember>>,
}

/// Request to update a customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCustomerRequest {
    pub id: i64,
    pub customer: CustomerPayload,
}

/// How a family member is attached when a customer is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyLink {
    /// An already stored customer becomes a child of the written customer
    Existing(i64),
    /// A new child customer is created
    New(FamilyMember),
}

/// Write model handed to the customer store by `save_one`
#[derive(Debug, Clone)]
pub struct CustomerRecord {
    /// `None` inserts a new customer, `Some` replaces an existing one
    pub id: Option<i64>,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub nic_number: String,
    pub mobile_numbers: Vec<String>,
    pub addresses: Vec<AddressInput>,
    /// `None` leaves existing family links untouched
    pub family_members: Option<Vec<FamilyLink>>,
}

/// A not-yet-persisted customer produced by the spreadsheet row parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub nic_number: String,
}

/// City with its country name
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: i64,
    pub name: String,
    pub country_id: i64,
    pub country_name: String,
}

/// Country reference entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_payload_deserializes_without_collections() {
        let json = r#"{"name":"Nimal Perera","dateOfBirth":"1990-03-15","nicNumber":"900751234V"}"#;
        let payload: CustomerPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.nic_number, "900751234V");
        assert!(payload.mobile_numbers.is_none());
        assert!(payload.family_members.is_none());
    }

    #[test]
    fn test_family_member_uses_camel_case() {
        let member = FamilyMember {
            family_member_name: "Kamala".to_string(),
            nic_number: "925551234V".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1992, 1, 5).unwrap(),
        };
        let json = serde_json::to_string(&member).unwrap();
        assert!(json.contains("familyMemberName"));
        assert!(json.contains("\"dateOfBirth\":\"1992-01-05\""));
    }
}
