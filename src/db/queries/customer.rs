//! Customer database queries

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use crate::services::store::{CustomerSort, CustomerStore, StoreError};
use crate::types::{
    AddressDetails, CandidateRecord, City, Country, Customer, CustomerDetails, CustomerRecord,
    FamilyLink, FamilyMember,
};

/// Rows per multi-row INSERT; three binds each keeps us under the
/// PostgreSQL limit of 65535 parameters
const INSERT_CHUNK: usize = 10_000;

const CUSTOMER_COLUMNS: &str =
    "id, name, date_of_birth, nic_number, parent_customer_id, created_at, updated_at";

/// PostgreSQL-backed customer store
#[derive(Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &CustomerRecord,
    ) -> Result<i64, StoreError> {
        let id = match record.id {
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO customers (name, date_of_birth, nic_number, created_at, updated_at)
                    VALUES ($1, $2, $3, NOW(), NOW())
                    RETURNING id
                    "#,
                )
                .bind(&record.name)
                .bind(record.date_of_birth)
                .bind(&record.nic_number)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| unique_violation(e, &record.nic_number))?
            }
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE customers
                    SET name = $2, date_of_birth = $3, nic_number = $4, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&record.name)
                .bind(record.date_of_birth)
                .bind(&record.nic_number)
                .execute(&mut **tx)
                .await
                .map_err(|e| unique_violation(e, &record.nic_number))?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound(format!("Customer not found with id: {}", id)));
                }
                id
            }
        };

        sqlx::query("DELETE FROM mobile_numbers WHERE customer_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        for number in &record.mobile_numbers {
            sqlx::query("INSERT INTO mobile_numbers (customer_id, mobile_number) VALUES ($1, $2)")
                .bind(id)
                .bind(number)
                .execute(&mut **tx)
                .await?;
        }

        sqlx::query("DELETE FROM addresses WHERE customer_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        for address in &record.addresses {
            sqlx::query(
                r#"
                INSERT INTO addresses (customer_id, address_line_1, address_line_2, city_id)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id)
            .bind(&address.address_line1)
            .bind(&address.address_line2)
            .bind(address.city_id)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(links) = &record.family_members {
            sqlx::query("UPDATE customers SET parent_customer_id = NULL WHERE parent_customer_id = $1")
                .bind(id)
                .execute(&mut **tx)
                .await?;

            for link in links {
                match link {
                    FamilyLink::Existing(member_id) => {
                        let result = sqlx::query(
                            "UPDATE customers SET parent_customer_id = $1, updated_at = NOW() WHERE id = $2",
                        )
                        .bind(id)
                        .bind(member_id)
                        .execute(&mut **tx)
                        .await?;
                        if result.rows_affected() == 0 {
                            return Err(StoreError::NotFound(format!(
                                "Customer not found with id: {}",
                                member_id
                            )));
                        }
                    }
                    FamilyLink::New(member) => {
                        sqlx::query(
                            r#"
                            INSERT INTO customers (name, date_of_birth, nic_number, parent_customer_id)
                            VALUES ($1, $2, $3, $4)
                            "#,
                        )
                        .bind(&member.family_member_name)
                        .bind(member.date_of_birth)
                        .bind(&member.nic_number)
                        .bind(id)
                        .execute(&mut **tx)
                        .await
                        .map_err(|e| unique_violation(e, &member.nic_number))?;
                    }
                }
            }
        }

        Ok(id)
    }

    async fn load_details(&self, customer: Customer) -> Result<CustomerDetails, StoreError> {
        let mobile_numbers: Vec<String> = sqlx::query_scalar(
            "SELECT mobile_number FROM mobile_numbers WHERE customer_id = $1 ORDER BY id",
        )
        .bind(customer.id)
        .fetch_all(&self.pool)
        .await?;

        let addresses = sqlx::query_as::<_, AddressDetails>(
            r#"
            SELECT a.id, a.address_line_1, a.address_line_2, a.city_id,
                   ci.name AS city_name, co.name AS country_name
            FROM addresses a
            JOIN cities ci ON ci.id = a.city_id
            JOIN countries co ON co.id = ci.country_id
            WHERE a.customer_id = $1
            ORDER BY a.id
            "#,
        )
        .bind(customer.id)
        .fetch_all(&self.pool)
        .await?;

        let family_members = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE parent_customer_id = $1 ORDER BY id",
            CUSTOMER_COLUMNS
        ))
        .bind(customer.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|member| FamilyMember {
            family_member_name: member.name,
            nic_number: member.nic_number,
            date_of_birth: member.date_of_birth,
        })
        .collect();

        Ok(CustomerDetails {
            id: customer.id,
            name: customer.name,
            date_of_birth: customer.date_of_birth,
            nic_number: customer.nic_number,
            mobile_numbers,
            addresses,
            family_members,
            created_at: customer.created_at,
            updated_at: customer.updated_at,
        })
    }

    async fn find_customer(&self, id: i64) -> Result<Option<Customer>, StoreError> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE id = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }
}

/// Turn a unique-index violation on `nic_number` into a `Conflict`
fn unique_violation(err: sqlx::Error, nic_number: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("Customer with NIC {} already exists", nic_number))
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl CustomerStore for PgCustomerStore {
    async fn exists_by_nic(&self, nic_number: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM customers WHERE nic_number = $1)")
                .bind(nic_number)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn find_by_nic(&self, nic_number: &str) -> Result<Option<Customer>, StoreError> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE nic_number = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(nic_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn find_details(&self, id: i64) -> Result<Option<CustomerDetails>, StoreError> {
        match self.find_customer(id).await? {
            Some(customer) => Ok(Some(self.load_details(customer).await?)),
            None => Ok(None),
        }
    }

    async fn save_one(&self, record: CustomerRecord) -> Result<CustomerDetails, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = Self::write_record(&mut tx, &record).await?;
        tx.commit().await?;

        self.find_details(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Customer not found with id: {}", id)))
    }

    async fn save_batch(&self, batch: &[CandidateRecord]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in batch.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO customers (name, date_of_birth, nic_number) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(&record.name)
                    .push_bind(record.date_of_birth)
                    .push_bind(&record.nic_number);
            });

            builder.build().execute(&mut *tx).await.map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("Batch contains an existing NIC: {}", db.message()))
                }
                _ => StoreError::Database(e),
            })?;
        }

        tx.commit().await?;
        debug!("Inserted batch of {} customers", batch.len());
        Ok(())
    }

    async fn list_top_level(
        &self,
        sort: CustomerSort,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CustomerDetails>, i64), StoreError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE parent_customer_id IS NULL")
                .fetch_one(&self.pool)
                .await?;

        // Column and direction come from a closed set, never from client text
        let query = format!(
            "SELECT {} FROM customers WHERE parent_customer_id IS NULL ORDER BY {} {}, id LIMIT $1 OFFSET $2",
            CUSTOMER_COLUMNS,
            sort.column.as_sql(),
            if sort.descending { "DESC" } else { "ASC" }
        );
        let customers = sqlx::query_as::<_, Customer>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(customers.len());
        for customer in customers {
            items.push(self.load_details(customer).await?);
        }

        Ok((items, total))
    }

    async fn find_city(&self, id: i64) -> Result<Option<City>, StoreError> {
        let city = sqlx::query_as::<_, City>(
            r#"
            SELECT ci.id, ci.name, ci.country_id, co.name AS country_name
            FROM cities ci
            JOIN countries co ON co.id = ci.country_id
            WHERE ci.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(city)
    }

    async fn list_cities(&self) -> Result<Vec<City>, StoreError> {
        let cities = sqlx::query_as::<_, City>(
            r#"
            SELECT ci.id, ci.name, ci.country_id, co.name AS country_name
            FROM cities ci
            JOIN countries co ON co.id = ci.country_id
            ORDER BY ci.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(cities)
    }

    async fn list_countries(&self) -> Result<Vec<Country>, StoreError> {
        let countries = sqlx::query_as::<_, Country>("SELECT id, name FROM countries ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(countries)
    }
}
