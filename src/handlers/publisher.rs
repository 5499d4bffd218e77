//! Publisher handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::StatusChangeError;
use crate::services::publisher_status::change_gam_status;
use crate::services::store::PublisherStore;
use crate::types::{ErrorResponse, Request, SuccessResponse, UpdateGamStatusRequest};

pub fn status_error_response(request_id: Uuid, err: &StatusChangeError) -> ErrorResponse {
    let code = match err {
        StatusChangeError::UnknownStatus(_) => "INVALID_REQUEST",
        StatusChangeError::NotFound(_) => "NOT_FOUND",
        StatusChangeError::Forbidden { .. } | StatusChangeError::NotOwner(_) => "FORBIDDEN",
        StatusChangeError::Store(_) => "DATABASE_ERROR",
    };
    ErrorResponse::new(request_id, code, err.to_string())
}

/// Handle adops.publisher.status.update messages
pub async fn handle_status_update(
    client: Client,
    mut subscriber: Subscriber,
    publishers: Arc<dyn PublisherStore>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received adops.publisher.status.update message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<UpdateGamStatusRequest> = match serde_json::from_slice(&msg.payload) {
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

        let payload = &request.payload;
        match change_gam_status(publishers.as_ref(), &auth_info, payload.publisher_id, &payload.status).await {
            Ok(publisher) => {
                let response = SuccessResponse::new(request.id, publisher);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                warn!("GAM status change refused for {}: {}", payload.publisher_id, e);
                let error = status_error_response(request.id, &e);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GamStatus, UserRole};

    #[test]
    fn refusals_map_to_error_codes() {
        let id = Uuid::nil();
        let forbidden = StatusChangeError::Forbidden {
            role: UserRole::Partner,
            from: GamStatus::Pending,
            to: GamStatus::Accepted,
        };
        assert_eq!(status_error_response(id, &forbidden).error.code, "FORBIDDEN");
        assert_eq!(status_error_response(id, &StatusChangeError::NotOwner(id)).error.code, "FORBIDDEN");
        assert_eq!(status_error_response(id, &StatusChangeError::NotFound(id)).error.code, "NOT_FOUND");
        assert_eq!(
            status_error_response(id, &StatusChangeError::UnknownStatus("x".into())).error.code,
            "INVALID_REQUEST"
        );
        assert_eq!(
            status_error_response(id, &StatusChangeError::Store(anyhow::anyhow!("db down"))).error.code,
            "DATABASE_ERROR"
        );
    }
}
