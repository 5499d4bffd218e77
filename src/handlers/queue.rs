//! Data fetch queue handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::QueueAccessError;
use crate::services::queue::QueueService;
use crate::types::{
    EmptyPayload, ErrorResponse, PublisherQueueRequest, Request, RetryQueueResponse, SuccessResponse,
};

pub fn queue_access_error_response(request_id: Uuid, err: &QueueAccessError) -> ErrorResponse {
    let code = match err {
        QueueAccessError::NotFound(_) => "NOT_FOUND",
        QueueAccessError::NotOwner(_) => "FORBIDDEN",
        QueueAccessError::Store(_) => "DATABASE_ERROR",
    };
    ErrorResponse::new(request_id, code, err.to_string())
}

/// Handle adops.queue.status messages
pub async fn handle_status(
    client: Client,
    mut subscriber: Subscriber,
    queue: QueueService,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received adops.queue.status message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if auth::extract_auth(&request, &jwt_secret).is_err() {
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", "Authentication required");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        match queue.get_queue_status().await {
            Ok(status) => {
                let response = SuccessResponse::new(request.id, status);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to read queue status: {:#}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", format!("{:#}", e));
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle adops.queue.publisher messages
pub async fn handle_publisher_status(
    client: Client,
    mut subscriber: Subscriber,
    queue: QueueService,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received adops.queue.publisher message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<PublisherQueueRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let auth_info = match auth::extract_auth(&request, &jwt_secret) {
            Ok(info) => info,
            Err(_) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", "Authentication required");
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queue
            .get_publisher_queue_status_as(&auth_info, request.payload.publisher_id)
            .await
        {
            Ok(item) => {
                let response = SuccessResponse::new(request.id, item);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                warn!("Queue item lookup refused: {}", e);
                let error = queue_access_error_response(request.id, &e);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle adops.queue.retry messages
pub async fn handle_retry(
    client: Client,
    mut subscriber: Subscriber,
    queue: QueueService,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received adops.queue.retry message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<PublisherQueueRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let auth_info = match auth::extract_auth(&request, &jwt_secret) {
            Ok(info) => info,
            Err(_) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", "Authentication required");
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if !auth_info.can_upload() {
            let error = ErrorResponse::new(request.id, "FORBIDDEN", "Only admins and partners can retry data fetches");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let publisher_id = request.payload.publisher_id;
        match queue.retry_failed_item_as(&auth_info, publisher_id).await {
            Ok(retried) => {
                let response = SuccessResponse::new(request.id, RetryQueueResponse { publisher_id, retried });
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                warn!("Queue retry refused for {}: {}", publisher_id, e);
                let error = queue_access_error_response(request.id, &e);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
