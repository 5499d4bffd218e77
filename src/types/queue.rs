//! Historical data fetch queue types
//!
//! `publisher_data_queue` rows are the contract between the upload pipeline
//! (producer) and the queue worker (consumer). Field names follow the table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fetch type used for newly uploaded publishers
pub const HISTORICAL_FETCH_TYPE: &str = "historical_2_months";

/// Attempts before a queue item becomes terminally failed
pub const MAX_FETCH_ATTEMPTS: i32 = 3;

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "queue_status", rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One pending historical-data fetch for one publisher
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub publisher_id: Uuid,
    pub status: QueueItemStatus,
    pub fetch_type: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnqueueOutcome {
    Queued,
    AlreadyQueued,
}

/// Aggregate queue counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

impl QueueStatus {
    /// Build a summary from per-status counts.
    pub fn from_counts(counts: &[(QueueItemStatus, i64)]) -> Self {
        let mut status = QueueStatus::default();
        for &(item_status, count) in counts {
            match item_status {
                QueueItemStatus::Pending => status.pending += count,
                QueueItemStatus::Processing => status.processing += count,
                QueueItemStatus::Completed => status.completed += count,
                QueueItemStatus::Failed => status.failed += count,
            }
            status.total += count;
        }
        status
    }
}

/// State a queue item moves to after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    pub retry_count: i32,
    pub status: QueueItemStatus,
}

impl FailureTransition {
    /// Next state for an item that has failed `current_retry_count` times before.
    pub fn after(current_retry_count: i32) -> Self {
        let retry_count = current_retry_count + 1;
        let status = if retry_count >= MAX_FETCH_ATTEMPTS {
            QueueItemStatus::Failed
        } else {
            QueueItemStatus::Pending
        };
        Self { retry_count, status }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == QueueItemStatus::Failed
    }
}

/// Batch enqueue summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueBatchResult {
    pub success: u32,
    pub failed: u32,
}

/// Request addressing the queue entry of one publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherQueueRequest {
    pub publisher_id: Uuid,
}

/// Response to a retry request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueResponse {
    pub publisher_id: Uuid,
    pub retried: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_failures_return_to_pending() {
        let first = FailureTransition::after(0);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.status, QueueItemStatus::Pending);

        let second = FailureTransition::after(1);
        assert_eq!(second.retry_count, 2);
        assert!(!second.is_terminal());
    }

    #[test]
    fn third_failure_is_terminal() {
        let third = FailureTransition::after(2);
        assert_eq!(third.retry_count, 3);
        assert_eq!(third.status, QueueItemStatus::Failed);
        assert!(third.is_terminal());
    }

    #[test]
    fn queue_status_tallies_counts() {
        let status = QueueStatus::from_counts(&[
            (QueueItemStatus::Pending, 4),
            (QueueItemStatus::Failed, 1),
            (QueueItemStatus::Completed, 7),
        ]);
        assert_eq!(status.pending, 4);
        assert_eq!(status.processing, 0);
        assert_eq!(status.completed, 7);
        assert_eq!(status.failed, 1);
        assert_eq!(status.total, 12);
    }

    #[test]
    fn queue_status_empty_is_all_zero() {
        assert_eq!(QueueStatus::from_counts(&[]), QueueStatus::default());
    }

    #[test]
    fn queue_item_keeps_table_field_names() {
        let item = QueueItem {
            id: Uuid::nil(),
            publisher_id: Uuid::nil(),
            status: QueueItemStatus::Pending,
            fetch_type: HISTORICAL_FETCH_TYPE.to_string(),
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("publisher_id").is_some());
        assert!(json.get("retry_count").is_some());
        assert_eq!(json["status"], "pending");
    }
}
