//! Database queries

pub mod customer;
pub mod import_job;

pub use customer::PgCustomerStore;
pub use import_job::PgJobStore;
