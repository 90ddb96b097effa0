//! Customer message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{publish, reply_subject};
use crate::services::customer_service::{CustomerError, CustomerService};
use crate::types::{
    CustomerPayload, EmptyPayload, ErrorResponse, IdRequest, ListRequest, Request, SuccessResponse,
    UpdateCustomerRequest,
};

/// Error reply for a failed customer operation
pub fn error_response(request_id: Uuid, err: &CustomerError) -> ErrorResponse {
    ErrorResponse::new(request_id, err.code(), err.to_string())
}

/// Parse a request envelope; on failure an INVALID_REQUEST error is sent
/// and `None` returned
async fn parse<T: DeserializeOwned>(
    client: &Client,
    reply: async_nats::Subject,
    payload: &[u8],
) -> Result<Option<Request<T>>> {
    match serde_json::from_slice(payload) {
        Ok(request) => Ok(Some(request)),
        Err(e) => {
            error!("Failed to parse request: {}", e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            publish(client, reply, &error).await?;
            Ok(None)
        }
    }
}

fn log_failure(operation: &str, err: &CustomerError) {
    if err.code() == "DATABASE_ERROR" {
        error!("Failed to {}: {}", operation, err);
    } else {
        warn!("Failed to {}: {}", operation, err);
    }
}

/// Handle crm.customer.create messages
pub async fn handle_create(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<CustomerService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received customer.create message");

        let Some(reply) = reply_subject(&msg) else {
            continue;
        };
        let Some(request) = parse::<CustomerPayload>(&client, reply.clone(), &msg.payload).await? else {
            continue;
        };

        match service.create(request.payload).await {
            Ok(customer) => {
                debug!("Created customer: {}", customer.id);
                publish(&client, reply, &SuccessResponse::new(request.id, customer)).await?;
            }
            Err(e) => {
                log_failure("create customer", &e);
                publish(&client, reply, &error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle crm.customer.get messages
pub async fn handle_get(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<CustomerService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = reply_subject(&msg) else {
            continue;
        };
        let Some(request) = parse::<IdRequest>(&client, reply.clone(), &msg.payload).await? else {
            continue;
        };

        match service.get(request.payload.id).await {
            Ok(customer) => {
                publish(&client, reply, &SuccessResponse::new(request.id, customer)).await?;
            }
            Err(e) => {
                log_failure("get customer", &e);
                publish(&client, reply, &error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle crm.customer.update messages
pub async fn handle_update(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<CustomerService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received customer.update message");

        let Some(reply) = reply_subject(&msg) else {
            continue;
        };
        let Some(request) = parse::<UpdateCustomerRequest>(&client, reply.clone(), &msg.payload).await?
        else {
            continue;
        };

        let UpdateCustomerRequest { id, customer } = request.payload;
        match service.update(id, customer).await {
            Ok(customer) => {
                publish(&client, reply, &SuccessResponse::new(request.id, customer)).await?;
            }
            Err(e) => {
                log_failure("update customer", &e);
                publish(&client, reply, &error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle crm.customer.list messages
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<CustomerService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = reply_subject(&msg) else {
            continue;
        };
        let Some(request) = parse::<ListRequest>(&client, reply.clone(), &msg.payload).await? else {
            continue;
        };

        match service.list(&request.payload).await {
            Ok(page) => {
                debug!("Listing {} customers", page.items.len());
                publish(&client, reply, &SuccessResponse::new(request.id, page)).await?;
            }
            Err(e) => {
                log_failure("list customers", &e);
                publish(&client, reply, &error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle crm.city.list messages
pub async fn handle_cities(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<CustomerService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = reply_subject(&msg) else {
            continue;
        };
        let Some(request) = parse::<EmptyPayload>(&client, reply.clone(), &msg.payload).await? else {
            continue;
        };

        match service.cities().await {
            Ok(cities) => publish(&client, reply, &SuccessResponse::new(request.id, cities)).await?,
            Err(e) => {
                log_failure("list cities", &e);
                publish(&client, reply, &error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle crm.country.list messages
pub async fn handle_countries(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<CustomerService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = reply_subject(&msg) else {
            continue;
        };
        let Some(request) = parse::<EmptyPayload>(&client, reply.clone(), &msg.payload).await? else {
            continue;
        };

        match service.countries().await {
            Ok(countries) => {
                publish(&client, reply, &SuccessResponse::new(request.id, countries)).await?
            }
            Err(e) => {
                log_failure("list countries", &e);
                publish(&client, reply, &error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}
