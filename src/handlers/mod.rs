//! NATS message handlers

pub mod bulk_import;
pub mod customer;

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Message, Subject};
use serde::Serialize;
use tokio::select;
use tracing::{error, info, warn};

use crate::services::bulk_import::BulkImportService;
use crate::services::customer_service::CustomerService;

pub const SUBJECT_BULK_SUBMIT: &str = "crm.customer.bulk.submit";
pub const SUBJECT_BULK_STATUS: &str = "crm.customer.bulk.status";
pub const SUBJECT_CUSTOMER_CREATE: &str = "crm.customer.create";
pub const SUBJECT_CUSTOMER_GET: &str = "crm.customer.get";
pub const SUBJECT_CUSTOMER_UPDATE: &str = "crm.customer.update";
pub const SUBJECT_CUSTOMER_LIST: &str = "crm.customer.list";
pub const SUBJECT_CITY_LIST: &str = "crm.city.list";
pub const SUBJECT_COUNTRY_LIST: &str = "crm.country.list";

/// Services shared by all handlers
#[derive(Clone)]
pub struct Services {
    pub customers: Arc<CustomerService>,
    pub bulk_import: Arc<BulkImportService>,
}

/// Reply subject of a request; messages without one are logged and dropped
pub(crate) fn reply_subject(msg: &Message) -> Option<Subject> {
    match msg.reply {
        Some(ref reply) => Some(reply.clone()),
        None => {
            warn!("Message on {} without reply subject", msg.subject);
            None
        }
    }
}

/// Serialize and publish a reply; publish failures are logged only
pub(crate) async fn publish<T: Serialize>(client: &Client, reply: Subject, body: &T) -> Result<()> {
    let bytes = serde_json::to_vec(body)?;
    if let Err(e) = client.publish(reply, bytes.into()).await {
        error!("Failed to publish reply: {}", e);
    }
    Ok(())
}

/// Start all message handlers
pub async fn start_handlers(client: Client, services: Services) -> Result<()> {
    info!("Starting message handlers...");

    let bulk_submit_sub = client.subscribe(SUBJECT_BULK_SUBMIT).await?;
    let bulk_status_sub = client.subscribe(SUBJECT_BULK_STATUS).await?;
    let customer_create_sub = client.subscribe(SUBJECT_CUSTOMER_CREATE).await?;
    let customer_get_sub = client.subscribe(SUBJECT_CUSTOMER_GET).await?;
    let customer_update_sub = client.subscribe(SUBJECT_CUSTOMER_UPDATE).await?;
    let customer_list_sub = client.subscribe(SUBJECT_CUSTOMER_LIST).await?;
    let city_list_sub = client.subscribe(SUBJECT_CITY_LIST).await?;
    let country_list_sub = client.subscribe(SUBJECT_COUNTRY_LIST).await?;

    info!("Subscribed to NATS subjects");

    let client_bulk_submit = client.clone();
    let bulk_submit_service = services.bulk_import.clone();
    let bulk_submit_handle = tokio::spawn(async move {
        bulk_import::handle_submit(client_bulk_submit, bulk_submit_sub, bulk_submit_service).await
    });

    let client_bulk_status = client.clone();
    let bulk_status_service = services.bulk_import.clone();
    let bulk_status_handle = tokio::spawn(async move {
        bulk_import::handle_status(client_bulk_status, bulk_status_sub, bulk_status_service).await
    });

    let client_create = client.clone();
    let create_service = services.customers.clone();
    let customer_create_handle = tokio::spawn(async move {
        customer::handle_create(client_create, customer_create_sub, create_service).await
    });

    let client_get = client.clone();
    let get_service = services.customers.clone();
    let customer_get_handle = tokio::spawn(async move {
        customer::handle_get(client_get, customer_get_sub, get_service).await
    });

    let client_update = client.clone();
    let update_service = services.customers.clone();
    let customer_update_handle = tokio::spawn(async move {
        customer::handle_update(client_update, customer_update_sub, update_service).await
    });

    let client_list = client.clone();
    let list_service = services.customers.clone();
    let customer_list_handle = tokio::spawn(async move {
        customer::handle_list(client_list, customer_list_sub, list_service).await
    });

    let client_cities = client.clone();
    let cities_service = services.customers.clone();
    let city_list_handle = tokio::spawn(async move {
        customer::handle_cities(client_cities, city_list_sub, cities_service).await
    });

    let client_countries = client.clone();
    let countries_service = services.customers.clone();
    let country_list_handle = tokio::spawn(async move {
        customer::handle_countries(client_countries, country_list_sub, countries_service).await
    });

    info!("All handlers started, waiting for messages...");

    // Any handler ending means its subscription is gone
    select! {
        result = bulk_submit_handle => {
            error!("Bulk submit handler finished: {:?}", result);
        }
        result = bulk_status_handle => {
            error!("Bulk status handler finished: {:?}", result);
        }
        result = customer_create_handle => {
            error!("Customer create handler finished: {:?}", result);
        }
        result = customer_get_handle => {
            error!("Customer get handler finished: {:?}", result);
        }
        result = customer_update_handle => {
            error!("Customer update handler finished: {:?}", result);
        }
        result = customer_list_handle => {
            error!("Customer list handler finished: {:?}", result);
        }
        result = city_list_handle => {
            error!("City list handler finished: {:?}", result);
        }
        result = country_list_handle => {
            error!("Country list handler finished: {:?}", result);
        }
    }

    Ok(())
}
