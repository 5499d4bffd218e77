//! Background consumer of the publisher data queue
//!
//! One item at a time, oldest first: claim it, mark the publisher as
//! fetching, trigger the setup function, then record the outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::services::publisher_setup::PublisherSetup;
use crate::services::queue::QueueService;
use crate::services::store::PublisherStore;
use crate::types::DataFetchStatus;

/// What one `process_next` call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ProcessOutcome {
    /// Nothing to do (empty queue or the item was claimed elsewhere)
    Idle,
    #[serde(rename_all = "camelCase")]
    Completed { publisher_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Failed {
        publisher_id: Uuid,
        retry_count: i32,
        will_retry: bool,
    },
}

pub struct QueueWorker {
    queue: QueueService,
    publishers: Arc<dyn PublisherStore>,
    setup: Arc<dyn PublisherSetup>,
    poll_interval: Duration,
    lease: Option<Duration>,
}

impl QueueWorker {
    pub fn new(
        queue: QueueService,
        publishers: Arc<dyn PublisherStore>,
        setup: Arc<dyn PublisherSetup>,
        poll_interval: Duration,
        lease: Option<Duration>,
    ) -> Self {
        Self {
            queue,
            publishers,
            setup,
            poll_interval,
            lease,
        }
    }

    /// Process the oldest pending item, if any.
    pub async fn process_next(&self) -> Result<ProcessOutcome> {
        if let Some(lease) = self.lease {
            self.queue.reclaim_stale(lease).await?;
        }

        let Some(next) = self.queue.get_next_pending_item().await? else {
            return Ok(ProcessOutcome::Idle);
        };
        let Some(item) = self.queue.mark_as_processing(next.id).await? else {
            debug!("Queue item {} was claimed by another worker", next.id);
            return Ok(ProcessOutcome::Idle);
        };

        let publisher_id = item.publisher_id;
        info!("Processing queue item {} for publisher {}", item.id, publisher_id);
        self.publishers
            .set_data_fetch_status(publisher_id, DataFetchStatus::Fetching)
            .await?;

        match self.setup.run_setup(publisher_id).await {
            Ok(()) => {
                self.queue.mark_as_completed(item.id).await?;
                Ok(ProcessOutcome::Completed { publisher_id })
            }
            Err(e) => {
                let transition = self.queue.mark_as_failed(item.id, &format!("{:#}", e)).await?;
                Ok(ProcessOutcome::Failed {
                    publisher_id,
                    retry_count: transition.retry_count,
                    will_retry: !transition.is_terminal(),
                })
            }
        }
    }

    /// Drain the queue, then poll every `poll_interval` until cancelled.
    /// A failed attempt also waits one interval before the next poll.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Queue worker started (poll interval {:?})", self.poll_interval);

        while !cancel.is_cancelled() {
            match self.process_next().await {
                Ok(ProcessOutcome::Completed { .. }) => continue,
                // A retried item is the oldest pending again; wait before the next attempt
                Ok(_) => {}
                Err(e) => error!("Queue worker iteration failed: {:#}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Queue worker stopped");
    }
}
