//! Type definitions

pub mod customer;
pub mod import_job;
pub mod messages;

pub use customer::*;
pub use import_job::*;
pub use messages::*;
