//! Bulk upload handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::UploadError;
use crate::services::bulk_upload::{BulkUploader, UploadContext};
use crate::services::csv_parser::upload_template;
use crate::types::{BulkUploadProgress, BulkUploadRequest, EmptyPayload, ErrorResponse, Request, SuccessResponse};

/// Subject progress updates for one upload are published on
pub fn progress_subject(request_id: Uuid) -> String {
    format!("adops.publisher.upload.progress.{}", request_id)
}

/// Error reply for a batch-level upload failure
pub fn upload_error_response(request_id: Uuid, err: &UploadError) -> ErrorResponse {
    match err {
        UploadError::Csv(csv) => ErrorResponse::new(request_id, "INVALID_CSV", csv.to_string())
            .with_details(serde_json::json!({ "reason": csv.code() })),
        UploadError::ParentAccounts(_) => ErrorResponse::new(request_id, "UPLOAD_ERROR", err.to_string()),
    }
}

/// Handle adops.publisher.upload messages
pub async fn handle_upload(
    client: Client,
    mut subscriber: Subscriber,
    uploader: Arc<BulkUploader>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received adops.publisher.upload message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<BulkUploadRequest> = match serde_json::from_slice(&msg.payload) {
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
            let error = ErrorResponse::new(request.id, "FORBIDDEN", "Only admins and partners can upload publishers");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let context = UploadContext {
            user_id: auth_info.user_id,
            partner_id: auth_info.owning_partner(request.payload.partner_id),
            default_parent_id: request.payload.default_parent_id,
        };

        // Progress goes out on its own subject while the upload runs
        let (tx, mut rx) = mpsc::unbounded_channel::<BulkUploadProgress>();
        let progress_client = client.clone();
        let subject = progress_subject(request.id);
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if let Ok(bytes) = serde_json::to_vec(&progress) {
                    let _ = progress_client.publish(subject.clone(), bytes.into()).await;
                }
            }
        });
        let on_progress = move |progress: BulkUploadProgress| {
            let _ = tx.send(progress);
        };

        let outcome = uploader
            .run_csv(&request.payload.csv_content, &context, &on_progress)
            .await;
        drop(on_progress);
        let _ = forwarder.await;

        match outcome {
            Ok(result) => {
                let response = SuccessResponse::new(request.id, result);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Bulk upload failed: {}", e);
                let error = upload_error_response(request.id, &e);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle adops.publisher.upload.template messages
pub async fn handle_template(
    client: Client,
    mut subscriber: Subscriber,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received adops.publisher.upload.template message");

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

        match upload_template() {
            Ok(template) => {
                let response = SuccessResponse::new(request.id, template);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to build upload template: {}", e);
                let error = ErrorResponse::new(request.id, "INTERNAL_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsvError;

    #[test]
    fn progress_subject_includes_request_id() {
        let id = Uuid::nil();
        assert_eq!(
            progress_subject(id),
            "adops.publisher.upload.progress.00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn csv_errors_map_to_invalid_csv_with_reason() {
        let err = UploadError::Csv(CsvError::TooManyRows { count: 60, max: 50 });
        let response = upload_error_response(Uuid::nil(), &err);
        assert_eq!(response.error.code, "INVALID_CSV");
        assert_eq!(response.error.details.unwrap()["reason"], "TOO_MANY_ROWS");
    }

    #[test]
    fn parent_lookup_failure_maps_to_upload_error() {
        let err = UploadError::ParentAccounts(anyhow::anyhow!("connection refused"));
        let response = upload_error_response(Uuid::nil(), &err);
        assert_eq!(response.error.code, "UPLOAD_ERROR");
        assert!(response.error.message.contains("connection refused"));
    }
}
