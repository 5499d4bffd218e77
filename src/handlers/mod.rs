//! NATS message handlers

pub mod ping;
pub mod publisher;
pub mod queue;
pub mod upload;

use std::sync::Arc;
use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, error};

use crate::config::Config;
use crate::services::store::PgStore;
use crate::services::Services;

/// Start all message handlers and the queue worker
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let services = Services::new(Arc::new(PgStore::new(pool)), config)?;
    let jwt_secret = Arc::new(config.jwt_secret.clone());
    info!(
        "Verifier backend: {}, verify concurrency: {}",
        config.verifier_backend, config.verify_concurrency
    );

    // Subscribe to all subjects
    let ping_sub = client.subscribe("adops.ping").await?;
    let upload_sub = client.subscribe("adops.publisher.upload").await?;
    let template_sub = client.subscribe("adops.publisher.upload.template").await?;
    let status_update_sub = client.subscribe("adops.publisher.status.update").await?;
    let queue_status_sub = client.subscribe("adops.queue.status").await?;
    let queue_publisher_sub = client.subscribe("adops.queue.publisher").await?;
    let queue_retry_sub = client.subscribe("adops.queue.retry").await?;

    info!("Subscribed to NATS subjects");

    let ping_handle = tokio::spawn(ping::handle_ping(client.clone(), ping_sub));
    let upload_handle = tokio::spawn(upload::handle_upload(
        client.clone(),
        upload_sub,
        services.uploader.clone(),
        jwt_secret.clone(),
    ));
    let template_handle = tokio::spawn(upload::handle_template(
        client.clone(),
        template_sub,
        jwt_secret.clone(),
    ));
    let status_update_handle = tokio::spawn(publisher::handle_status_update(
        client.clone(),
        status_update_sub,
        services.publishers.clone(),
        jwt_secret.clone(),
    ));
    let queue_status_handle = tokio::spawn(queue::handle_status(
        client.clone(),
        queue_status_sub,
        services.queue.clone(),
        jwt_secret.clone(),
    ));
    let queue_publisher_handle = tokio::spawn(queue::handle_publisher_status(
        client.clone(),
        queue_publisher_sub,
        services.queue.clone(),
        jwt_secret.clone(),
    ));
    let queue_retry_handle = tokio::spawn(queue::handle_retry(
        client.clone(),
        queue_retry_sub,
        services.queue.clone(),
        jwt_secret.clone(),
    ));

    // Queue worker runs until a handler exits
    let cancel = CancellationToken::new();
    let worker = services.worker.clone();
    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_cancel).await });

    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = upload_handle => {
            error!("Upload handler finished: {:?}", result);
        }
        result = template_handle => {
            error!("Template handler finished: {:?}", result);
        }
        result = status_update_handle => {
            error!("Status update handler finished: {:?}", result);
        }
        result = queue_status_handle => {
            error!("Queue status handler finished: {:?}", result);
        }
        result = queue_publisher_handle => {
            error!("Queue publisher handler finished: {:?}", result);
        }
        result = queue_retry_handle => {
            error!("Queue retry handler finished: {:?}", result);
        }
        result = worker_handle => {
            error!("Queue worker finished: {:?}", result);
        }
    }

    cancel.cancel();

    Ok(())
}
