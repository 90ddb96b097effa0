//! Business logic services

pub mod batch_writer;
pub mod bulk_import;
pub mod customer_service;
pub mod file_decoder;
pub mod job_tracker;
pub mod row_parser;
pub mod store;
