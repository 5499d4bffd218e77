//! Persistence seams for publishers and the data fetch queue
//!
//! - `PgStore` → production, delegates to `db::queries`
//! - `MemoryStore` → tests only, same uniqueness rules as the schema

#[cfg(test)]
use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use parking_lot::Mutex;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::types::{
    DataFetchStatus, EnqueueOutcome, FailureTransition, GamStatus, NewPublisher, ParentAccount,
    Publisher, QueueItem, QueueItemStatus,
};
#[cfg(test)]
use crate::types::ServiceKeyStatus;

/// Publisher and parent account persistence
#[async_trait]
pub trait PublisherStore: Send + Sync {
    async fn active_parent_accounts(&self) -> Result<Vec<ParentAccount>>;

    async fn insert_publisher(&self, publisher: &NewPublisher) -> Result<Publisher>;

    async fn get_publisher(&self, publisher_id: Uuid) -> Result<Option<Publisher>>;

    async fn update_gam_status(&self, publisher_id: Uuid, status: GamStatus) -> Result<Option<Publisher>>;

    async fn set_data_fetch_status(&self, publisher_id: Uuid, status: DataFetchStatus) -> Result<bool>;
}

/// `publisher_data_queue` persistence
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert_queue_item(&self, publisher_id: Uuid, fetch_type: &str) -> Result<EnqueueOutcome>;

    async fn count_by_status(&self) -> Result<Vec<(QueueItemStatus, i64)>>;

    async fn find_for_publisher(&self, publisher_id: Uuid, fetch_type: &str) -> Result<Option<QueueItem>>;

    async fn get_item(&self, item_id: Uuid) -> Result<Option<QueueItem>>;

    async fn next_pending(&self) -> Result<Option<QueueItem>>;

    /// pending → processing; `None` if the item is not pending anymore
    async fn claim(&self, item_id: Uuid) -> Result<Option<QueueItem>>;

    async fn complete(&self, item_id: Uuid) -> Result<Option<QueueItem>>;

    /// Apply `transition` only if `retry_count` still equals `expected_retry_count`
    async fn apply_failure(
        &self,
        item_id: Uuid,
        expected_retry_count: i32,
        transition: FailureTransition,
        error_message: &str,
    ) -> Result<bool>;

    async fn retry_failed(&self, publisher_id: Uuid, fetch_type: &str) -> Result<u64>;

    async fn reclaim_stale(&self, started_before: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// PgStore
// =============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PublisherStore for PgStore {
    async fn active_parent_accounts(&self) -> Result<Vec<ParentAccount>> {
        queries::parent_account::list_active_parent_accounts(&self.pool).await
    }

    async fn insert_publisher(&self, publisher: &NewPublisher) -> Result<Publisher> {
        queries::publisher::insert_publisher(&self.pool, publisher).await
    }

    async fn get_publisher(&self, publisher_id: Uuid) -> Result<Option<Publisher>> {
        queries::publisher::get_publisher(&self.pool, publisher_id).await
    }

    async fn update_gam_status(&self, publisher_id: Uuid, status: GamStatus) -> Result<Option<Publisher>> {
        queries::publisher::update_gam_status(&self.pool, publisher_id, status).await
    }

    async fn set_data_fetch_status(&self, publisher_id: Uuid, status: DataFetchStatus) -> Result<bool> {
        queries::publisher::set_data_fetch_status(&self.pool, publisher_id, status).await
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn insert_queue_item(&self, publisher_id: Uuid, fetch_type: &str) -> Result<EnqueueOutcome> {
        queries::queue::insert_queue_item(&self.pool, publisher_id, fetch_type).await
    }

    async fn count_by_status(&self) -> Result<Vec<(QueueItemStatus, i64)>> {
        queries::queue::count_by_status(&self.pool).await
    }

    async fn find_for_publisher(&self, publisher_id: Uuid, fetch_type: &str) -> Result<Option<QueueItem>> {
        queries::queue::find_for_publisher(&self.pool, publisher_id, fetch_type).await
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        queries::queue::get_queue_item(&self.pool, item_id).await
    }

    async fn next_pending(&self) -> Result<Option<QueueItem>> {
        queries::queue::next_pending(&self.pool).await
    }

    async fn claim(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        queries::queue::claim_item(&self.pool, item_id).await
    }

    async fn complete(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        queries::queue::complete_item(&self.pool, item_id).await
    }

    async fn apply_failure(
        &self,
        item_id: Uuid,
        expected_retry_count: i32,
        transition: FailureTransition,
        error_message: &str,
    ) -> Result<bool> {
        queries::queue::apply_failure(&self.pool, item_id, expected_retry_count, transition, error_message)
            .await
    }

    async fn retry_failed(&self, publisher_id: Uuid, fetch_type: &str) -> Result<u64> {
        queries::queue::retry_failed(&self.pool, publisher_id, fetch_type).await
    }

    async fn reclaim_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        queries::queue::reclaim_stale(&self.pool, started_before).await
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

#[cfg(test)]
#[derive(Default)]
struct MemoryState {
    parents: Vec<ParentAccount>,
    publishers: Vec<Publisher>,
    queue: Vec<QueueItem>,
    parent_lookup_unavailable: bool,
    queue_unavailable: bool,
    failing_inserts: HashSet<String>,
}

/// In-memory store. Items keep insertion order, which doubles as FIFO order.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active parent account
    pub fn with_parent(self, name: &str, parent_network_code: &str) -> Self {
        self.state.lock().parents.push(ParentAccount {
            id: Uuid::new_v4(),
            name: name.to_string(),
            parent_network_code: parent_network_code.to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        });
        self
    }

    pub fn add_parent(&self, parent: ParentAccount) {
        self.state.lock().parents.push(parent);
    }

    /// Insert a publisher directly, bypassing the upload pipeline
    pub fn seed_publisher(&self, publisher: Publisher) {
        self.state.lock().publishers.push(publisher);
    }

    /// Make every queue call fail
    pub fn set_queue_unavailable(&self, unavailable: bool) {
        self.state.lock().queue_unavailable = unavailable;
    }

    /// Make the parent account lookup fail
    pub fn set_parent_lookup_unavailable(&self, unavailable: bool) {
        self.state.lock().parent_lookup_unavailable = unavailable;
    }

    /// Make inserts of `network_code` fail
    pub fn fail_insert_for(&self, network_code: &str) {
        self.state.lock().failing_inserts.insert(network_code.to_string());
    }

    pub fn parents(&self) -> Vec<ParentAccount> {
        self.state.lock().parents.clone()
    }

    pub fn publishers(&self) -> Vec<Publisher> {
        self.state.lock().publishers.clone()
    }

    pub fn queue_items(&self) -> Vec<QueueItem> {
        self.state.lock().queue.clone()
    }

    /// Overwrite `started_at` of an item
    pub fn set_started_at(&self, item_id: Uuid, started_at: DateTime<Utc>) {
        if let Some(item) = self.state.lock().queue.iter_mut().find(|i| i.id == item_id) {
            item.started_at = Some(started_at);
        }
    }
}

#[cfg(test)]
fn ensure_queue_available(state: &MemoryState) -> Result<()> {
    if state.queue_unavailable {
        anyhow::bail!("publisher_data_queue is unavailable");
    }
    Ok(())
}

#[cfg(test)]
#[async_trait]
impl PublisherStore for MemoryStore {
    async fn active_parent_accounts(&self) -> Result<Vec<ParentAccount>> {
        let state = self.state.lock();
        if state.parent_lookup_unavailable {
            anyhow::bail!("mcm_parents is unavailable");
        }
        Ok(state
            .parents
            .iter()
            .filter(|p| p.status == "active")
            .cloned()
            .collect())
    }

    async fn insert_publisher(&self, publisher: &NewPublisher) -> Result<Publisher> {
        let mut state = self.state.lock();
        if state.failing_inserts.contains(&publisher.network_code) {
            anyhow::bail!("insert rejected for network code {}", publisher.network_code);
        }
        if state
            .publishers
            .iter()
            .any(|p| p.network_code.as_deref() == Some(publisher.network_code.as_str()))
        {
            anyhow::bail!(
                "duplicate key value violates unique constraint \"publishers_network_code_key\""
            );
        }

        let now = Utc::now();
        let created = Publisher {
            id: Uuid::new_v4(),
            name: publisher.name.clone(),
            domain: publisher.domain.clone(),
            contact_email: Some(publisher.contact_email.clone()),
            network_code: Some(publisher.network_code.clone()),
            revenue_share: Some(publisher.revenue_share),
            mcm_parent_id: publisher.mcm_parent_id,
            notes: publisher.notes.clone(),
            gam_status: GamStatus::Pending,
            service_key_status: ServiceKeyStatus::Verified,
            service_key_verified_at: Some(publisher.service_key_verified_at),
            data_fetch_status: DataFetchStatus::Pending,
            created_by: Some(publisher.created_by),
            partner_id: publisher.partner_id,
            created_at: now,
            updated_at: now,
        };
        state.publishers.push(created.clone());
        Ok(created)
    }

    async fn get_publisher(&self, publisher_id: Uuid) -> Result<Option<Publisher>> {
        Ok(self
            .state
            .lock()
            .publishers
            .iter()
            .find(|p| p.id == publisher_id)
            .cloned())
    }

    async fn update_gam_status(&self, publisher_id: Uuid, status: GamStatus) -> Result<Option<Publisher>> {
        let mut state = self.state.lock();
        Ok(state
            .publishers
            .iter_mut()
            .find(|p| p.id == publisher_id)
            .map(|p| {
                p.gam_status = status;
                p.updated_at = Utc::now();
                p.clone()
            }))
    }

    async fn set_data_fetch_status(&self, publisher_id: Uuid, status: DataFetchStatus) -> Result<bool> {
        let mut state = self.state.lock();
        match state.publishers.iter_mut().find(|p| p.id == publisher_id) {
            Some(p) => {
                p.data_fetch_status = status;
                p.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_queue_item(&self, publisher_id: Uuid, fetch_type: &str) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock();
        ensure_queue_available(&state)?;
        if state
            .queue
            .iter()
            .any(|i| i.publisher_id == publisher_id && i.fetch_type == fetch_type)
        {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }
        if !state.publishers.iter().any(|p| p.id == publisher_id) {
            anyhow::bail!("publisher {} does not exist", publisher_id);
        }

        state.queue.push(QueueItem {
            id: Uuid::new_v4(),
            publisher_id,
            status: QueueItemStatus::Pending,
            fetch_type: fetch_type.to_string(),
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });
        Ok(EnqueueOutcome::Queued)
    }

    async fn count_by_status(&self) -> Result<Vec<(QueueItemStatus, i64)>> {
        let state = self.state.lock();
        ensure_queue_available(&state)?;
        let mut counts: Vec<(QueueItemStatus, i64)> = Vec::new();
        for item in &state.queue {
            match counts.iter_mut().find(|(status, _)| *status == item.status) {
                Some((_, count)) => *count += 1,
                None => counts.push((item.status, 1)),
            }
        }
        Ok(counts)
    }

    async fn find_for_publisher(&self, publisher_id: Uuid, fetch_type: &str) -> Result<Option<QueueItem>> {
        let state = self.state.lock();
        ensure_queue_available(&state)?;
        Ok(state
            .queue
            .iter()
            .find(|i| i.publisher_id == publisher_id && i.fetch_type == fetch_type)
            .cloned())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        let state = self.state.lock();
        ensure_queue_available(&state)?;
        Ok(state.queue.iter().find(|i| i.id == item_id).cloned())
    }

    async fn next_pending(&self) -> Result<Option<QueueItem>> {
        let state = self.state.lock();
        ensure_queue_available(&state)?;
        Ok(state
            .queue
            .iter()
            .filter(|i| i.status == QueueItemStatus::Pending)
            .min_by_key(|i| i.created_at)
            .cloned())
    }

    async fn claim(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        let mut state = self.state.lock();
        ensure_queue_available(&state)?;
        Ok(state
            .queue
            .iter_mut()
            .find(|i| i.id == item_id && i.status == QueueItemStatus::Pending)
            .map(|i| {
                i.status = QueueItemStatus::Processing;
                i.started_at = Some(Utc::now());
                i.clone()
            }))
    }

    async fn complete(&self, item_id: Uuid) -> Result<Option<QueueItem>> {
        let mut state = self.state.lock();
        ensure_queue_available(&state)?;
        Ok(state.queue.iter_mut().find(|i| i.id == item_id).map(|i| {
            i.status = QueueItemStatus::Completed;
            i.completed_at = Some(Utc::now());
            i.error_message = None;
            i.clone()
        }))
    }

    async fn apply_failure(
        &self,
        item_id: Uuid,
        expected_retry_count: i32,
        transition: FailureTransition,
        error_message: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        ensure_queue_available(&state)?;
        let Some(item) = state
            .queue
            .iter_mut()
            .find(|i| i.id == item_id && i.retry_count == expected_retry_count)
        else {
            return Ok(false);
        };

        item.status = transition.status;
        item.retry_count = transition.retry_count;
        item.error_message = Some(error_message.to_string());
        item.completed_at = transition.is_terminal().then(Utc::now);
        Ok(true)
    }

    async fn retry_failed(&self, publisher_id: Uuid, fetch_type: &str) -> Result<u64> {
        let mut state = self.state.lock();
        ensure_queue_available(&state)?;
        let mut updated = 0;
        for item in state.queue.iter_mut().filter(|i| {
            i.publisher_id == publisher_id
                && i.fetch_type == fetch_type
                && i.status == QueueItemStatus::Failed
        }) {
            item.status = QueueItemStatus::Pending;
            item.error_message = None;
            item.started_at = None;
            item.completed_at = None;
            updated += 1;
        }
        Ok(updated)
    }

    async fn reclaim_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        ensure_queue_available(&state)?;
        let mut reclaimed = 0;
        for item in state.queue.iter_mut().filter(|i| {
            i.status == QueueItemStatus::Processing
                && i.started_at.is_some_and(|started| started < started_before)
        }) {
            item.status = QueueItemStatus::Pending;
            item.started_at = None;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}
