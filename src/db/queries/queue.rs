//! Publisher data queue queries
//!
//! Transitions are conditional updates so that two workers racing on the
//! same row cannot both win.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{EnqueueOutcome, FailureTransition, QueueItem, QueueItemStatus};

/// Insert a pending item. An existing `(publisher_id, fetch_type)` row is not an error.
pub async fn insert_queue_item(
    pool: &PgPool,
    publisher_id: Uuid,
    fetch_type: &str,
) -> Result<EnqueueOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO publisher_data_queue (id, publisher_id, status, fetch_type, retry_count, created_at)
        VALUES ($1, $2, 'pending', $3, 0, NOW())
        "#
    )
    .bind(Uuid::new_v4())
    .bind(publisher_id)
    .bind(fetch_type)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(EnqueueOutcome::Queued),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(EnqueueOutcome::AlreadyQueued),
        Err(e) => Err(e.into()),
    }
}

/// Number of items per status; statuses without items are absent
pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(QueueItemStatus, i64)>> {
    let rows: Vec<(QueueItemStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM publisher_data_queue GROUP BY status"
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn find_for_publisher(
    pool: &PgPool,
    publisher_id: Uuid,
    fetch_type: &str,
) -> Result<Option<QueueItem>> {
    let item = sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM publisher_data_queue WHERE publisher_id = $1 AND fetch_type = $2"
    )
    .bind(publisher_id)
    .bind(fetch_type)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

pub async fn get_queue_item(pool: &PgPool, item_id: Uuid) -> Result<Option<QueueItem>> {
    let item = sqlx::query_as::<_, QueueItem>("SELECT * FROM publisher_data_queue WHERE id = $1")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;

    Ok(item)
}

/// Oldest pending item (FIFO by creation time)
pub async fn next_pending(pool: &PgPool) -> Result<Option<QueueItem>> {
    let item = sqlx::query_as::<_, QueueItem>(
        r#"
        SELECT * FROM publisher_data_queue
        WHERE status = 'pending'
        ORDER BY created_at ASC
        LIMIT 1
        "#
    )
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

/// Move a pending item to processing; `None` when it is no longer pending
pub async fn claim_item(pool: &PgPool, item_id: Uuid) -> Result<Option<QueueItem>> {
    let item = sqlx::query_as::<_, QueueItem>(
        r#"
        UPDATE publisher_data_queue
        SET status = 'processing', started_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

pub async fn complete_item(pool: &PgPool, item_id: Uuid) -> Result<Option<QueueItem>> {
    let item = sqlx::query_as::<_, QueueItem>(
        r#"
        UPDATE publisher_data_queue
        SET status = 'completed', completed_at = NOW(), error_message = NULL
        WHERE id = $1
        RETURNING *
        "#
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

/// Record a failed attempt, only if nobody else changed `retry_count` meanwhile
pub async fn apply_failure(
    pool: &PgPool,
    item_id: Uuid,
    expected_retry_count: i32,
    transition: FailureTransition,
    error_message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE publisher_data_queue
        SET status = $3,
            retry_count = $4,
            error_message = $5,
            completed_at = CASE WHEN $3 = 'failed'::queue_status THEN NOW() ELSE NULL END
        WHERE id = $1 AND retry_count = $2
        "#
    )
    .bind(item_id)
    .bind(expected_retry_count)
    .bind(transition.status)
    .bind(transition.retry_count)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Put a terminally failed item back in the queue
pub async fn retry_failed(pool: &PgPool, publisher_id: Uuid, fetch_type: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE publisher_data_queue
        SET status = 'pending', error_message = NULL, started_at = NULL, completed_at = NULL
        WHERE publisher_id = $1 AND fetch_type = $2 AND status = 'failed'
        "#
    )
    .bind(publisher_id)
    .bind(fetch_type)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Return processing items started before `started_before` to pending
pub async fn reclaim_stale(pool: &PgPool, started_before: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE publisher_data_queue
        SET status = 'pending', started_at = NULL
        WHERE status = 'processing' AND started_at < $1
        "#
    )
    .bind(started_before)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
