//! Publisher database queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{DataFetchStatus, GamStatus, NewPublisher, Publisher, ServiceKeyStatus};

/// Insert a verified publisher in the initial lifecycle state
pub async fn insert_publisher(pool: &PgPool, publisher: &NewPublisher) -> Result<Publisher> {
    let created = sqlx::query_as::<_, Publisher>(
        r#"
        INSERT INTO publishers (
            id, name, domain, contact_email, network_code,
            revenue_share, mcm_parent_id, notes,
            gam_status, service_key_status, service_key_verified_at, data_fetch_status,
            created_by, partner_id, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5,
            $6, $7, $8,
            $9, $10, $11, $12,
            $13, $14, NOW(), NOW()
        )
        RETURNING *
        "#
    )
    .bind(Uuid::new_v4())
    .bind(&publisher.name)
    .bind(&publisher.domain)
    .bind(&publisher.contact_email)
    .bind(&publisher.network_code)
    .bind(publisher.revenue_share)
    .bind(publisher.mcm_parent_id)
    .bind(&publisher.notes)
    .bind(GamStatus::Pending)
    .bind(ServiceKeyStatus::Verified)
    .bind(publisher.service_key_verified_at)
    .bind(DataFetchStatus::Pending)
    .bind(publisher.created_by)
    .bind(publisher.partner_id)
    .fetch_one(pool)
    .await?;

    Ok(created)
}

/// Get a publisher by ID
pub async fn get_publisher(pool: &PgPool, publisher_id: Uuid) -> Result<Option<Publisher>> {
    let publisher = sqlx::query_as::<_, Publisher>("SELECT * FROM publishers WHERE id = $1")
        .bind(publisher_id)
        .fetch_optional(pool)
        .await?;

    Ok(publisher)
}

/// Set the GAM status; returns the updated row
pub async fn update_gam_status(
    pool: &PgPool,
    publisher_id: Uuid,
    status: GamStatus,
) -> Result<Option<Publisher>> {
    let publisher = sqlx::query_as::<_, Publisher>(
        r#"
        UPDATE publishers
        SET gam_status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#
    )
    .bind(publisher_id)
    .bind(status)
    .fetch_optional(pool)
    .await?;

    Ok(publisher)
}

/// Set the historical data fetch status
pub async fn set_data_fetch_status(
    pool: &PgPool,
    publisher_id: Uuid,
    status: DataFetchStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE publishers SET data_fetch_status = $2, updated_at = NOW() WHERE id = $1"
    )
    .bind(publisher_id)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
