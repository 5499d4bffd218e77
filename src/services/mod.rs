//! Business logic services

pub mod bulk_upload;
pub mod csv_parser;
pub mod publisher_setup;
pub mod publisher_status;
pub mod queue;
pub mod queue_worker;
pub mod store;
pub mod validation;
pub mod verification;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use bulk_upload::BulkUploader;
use publisher_setup::create_publisher_setup;
use queue::QueueService;
use queue_worker::QueueWorker;
use store::{PublisherStore, QueueStore};
use verification::{create_verifier, AccessVerifier};

/// Services wired to one store and the configured external backends
#[derive(Clone)]
pub struct Services {
    pub publishers: Arc<dyn PublisherStore>,
    pub queue: QueueService,
    pub uploader: Arc<BulkUploader>,
    pub worker: Arc<QueueWorker>,
}

impl Services {
    pub fn new<S>(store: Arc<S>, config: &Config) -> Result<Self>
    where
        S: PublisherStore + QueueStore + 'static,
    {
        let publishers: Arc<dyn PublisherStore> = store.clone();
        let queue = QueueService::new(store, publishers.clone());
        let verifier: Arc<dyn AccessVerifier> = Arc::from(create_verifier(config)?);
        info!("Access verifier initialized: {}", verifier.name());
        let setup = Arc::from(create_publisher_setup(config)?);

        let uploader = Arc::new(BulkUploader::new(
            publishers.clone(),
            verifier,
            queue.clone(),
            config.upload_settings(),
        ));
        let worker = Arc::new(QueueWorker::new(
            queue.clone(),
            publishers.clone(),
            setup,
            config.queue_poll_interval,
            config.queue_lease,
        ));

        Ok(Self {
            publishers,
            queue,
            uploader,
            worker,
        })
    }
}
