//! Historical data fetch queue
//!
//! Producer side (`queue_publisher`) is used by the upload pipeline, the
//! worker-side transitions by `QueueWorker`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthInfo;
use crate::error::QueueAccessError;
use crate::services::store::{PublisherStore, QueueStore};
use crate::types::{
    DataFetchStatus, EnqueueBatchResult, EnqueueOutcome, FailureTransition, QueueItem, QueueStatus,
    UserRole, HISTORICAL_FETCH_TYPE,
};

/// Optimistic updates retried this many times before giving up
const FAILURE_UPDATE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct QueueService {
    queue: Arc<dyn QueueStore>,
    publishers: Arc<dyn PublisherStore>,
}

impl QueueService {
    pub fn new(queue: Arc<dyn QueueStore>, publishers: Arc<dyn PublisherStore>) -> Self {
        Self { queue, publishers }
    }

    /// Enqueue the historical fetch for a publisher. Enqueueing twice is a no-op.
    pub async fn queue_publisher(&self, publisher_id: Uuid) -> Result<EnqueueOutcome> {
        let outcome = self
            .queue
            .insert_queue_item(publisher_id, HISTORICAL_FETCH_TYPE)
            .await
            .with_context(|| format!("Failed to queue publisher {}", publisher_id))?;

        match outcome {
            EnqueueOutcome::Queued => debug!("Queued historical fetch for publisher {}", publisher_id),
            EnqueueOutcome::AlreadyQueued => {
                debug!("Publisher {} already queued, skipping", publisher_id)
            }
        }
        Ok(outcome)
    }

    /// Enqueue several publishers, counting successes and failures
    pub async fn queue_publishers(&self, publisher_ids: &[Uuid]) -> EnqueueBatchResult {
        let mut result = EnqueueBatchResult::default();
        for &publisher_id in publisher_ids {
            match self.queue_publisher(publisher_id).await {
                Ok(_) => result.success += 1,
                Err(e) => {
                    warn!("{:#}", e);
                    result.failed += 1;
                }
            }
        }
        result
    }

    pub async fn get_queue_status(&self) -> Result<QueueStatus> {
        let counts = self
            .queue
            .count_by_status()
            .await
            .context("Failed to read queue status")?;
        Ok(QueueStatus::from_counts(&counts))
    }

    pub async fn get_publisher_queue_status(&self, publisher_id: Uuid) -> Result<Option<QueueItem>> {
        self.queue
            .find_for_publisher(publisher_id, HISTORICAL_FETCH_TYPE)
            .await
    }

    /// Oldest pending item
    pub async fn get_next_pending_item(&self) -> Result<Option<QueueItem>> {
        self.queue.next_pending().await
    }

    /// Claim a pending item; `None` when another worker got it first
    pub async fn mark_as_processing(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        self.queue.claim(item_id).await
    }

    /// Mark an item done and its publisher's data as fetched
    pub async fn mark_as_completed(&self, item_id: Uuid) -> Result<QueueItem> {
        let item = self
            .queue
            .complete(item_id)
            .await?
            .with_context(|| format!("Queue item {} not found", item_id))?;

        self.publishers
            .set_data_fetch_status(item.publisher_id, DataFetchStatus::Completed)
            .await?;

        info!("Queue item {} completed for publisher {}", item.id, item.publisher_id);
        Ok(item)
    }

    /// Record a failed attempt. The third failure is terminal and marks the
    /// publisher's data fetch as failed; earlier ones put the item back to pending.
    pub async fn mark_as_failed(&self, item_id: Uuid, error_message: &str) -> Result<FailureTransition> {
        for _ in 0..FAILURE_UPDATE_ATTEMPTS {
            let item = self
                .queue
                .get_item(item_id)
                .await?
                .with_context(|| format!("Queue item {} not found", item_id))?;

            let transition = FailureTransition::after(item.retry_count);
            if !self
                .queue
                .apply_failure(item_id, item.retry_count, transition, error_message)
                .await?
            {
                debug!("Queue item {} changed concurrently, re-reading", item_id);
                continue;
            }

            if transition.is_terminal() {
                self.publishers
                    .set_data_fetch_status(item.publisher_id, DataFetchStatus::Failed)
                    .await?;
                warn!(
                    "Queue item {} failed permanently after {} attempts: {}",
                    item_id, transition.retry_count, error_message
                );
            } else {
                info!(
                    "Queue item {} failed (attempt {}), will retry: {}",
                    item_id, transition.retry_count, error_message
                );
            }
            return Ok(transition);
        }

        anyhow::bail!("Queue item {} kept changing while recording failure", item_id)
    }

    /// Put a terminally failed item back to pending. Returns false if
    /// the publisher has no failed item.
    pub async fn retry_failed_item(&self, publisher_id: Uuid) -> Result<bool> {
        let updated = self
            .queue
            .retry_failed(publisher_id, HISTORICAL_FETCH_TYPE)
            .await?;
        if updated > 0 {
            info!("Re-queued failed fetch for publisher {}", publisher_id);
        }
        Ok(updated > 0)
    }

    /// Queue entry of a publisher, as seen by `actor`
    pub async fn get_publisher_queue_status_as(
        &self,
        actor: &AuthInfo,
        publisher_id: Uuid,
    ) -> Result<Option<QueueItem>, QueueAccessError> {
        self.authorize(actor, publisher_id).await?;
        Ok(self.get_publisher_queue_status(publisher_id).await?)
    }

    /// `retry_failed_item` on behalf of `actor`
    pub async fn retry_failed_item_as(&self, actor: &AuthInfo, publisher_id: Uuid) -> Result<bool, QueueAccessError> {
        self.authorize(actor, publisher_id).await?;
        Ok(self.retry_failed_item(publisher_id).await?)
    }

    async fn authorize(&self, actor: &AuthInfo, publisher_id: Uuid) -> Result<(), QueueAccessError> {
        if actor.role != UserRole::Partner {
            return Ok(());
        }
        let publisher = self
            .publishers
            .get_publisher(publisher_id)
            .await?
            .ok_or(QueueAccessError::NotFound(publisher_id))?;
        if !actor.can_access(&publisher) {
            return Err(QueueAccessError::NotOwner(publisher_id));
        }
        Ok(())
    }

    /// Return items stuck in processing for longer than `lease` to pending
    pub async fn reclaim_stale(&self, lease: Duration) -> Result<u64> {
        let lease = chrono::Duration::from_std(lease).context("Queue lease is out of range")?;
        let reclaimed = self.queue.reclaim_stale(Utc::now() - lease).await?;
        if reclaimed > 0 {
            warn!("Reclaimed {} stale processing queue items", reclaimed);
        }
        Ok(reclaimed)
    }
}
