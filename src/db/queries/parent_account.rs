//! MCM parent account queries

use anyhow::Result;
use sqlx::PgPool;

use crate::types::ParentAccount;

/// List parent accounts that may be assigned to new publishers
pub async fn list_active_parent_accounts(pool: &PgPool) -> Result<Vec<ParentAccount>> {
    let parents = sqlx::query_as::<_, ParentAccount>(
        r#"
        SELECT id, name, parent_network_code, status, created_at
        FROM mcm_parents
        WHERE status = 'active'
        ORDER BY name
        "#
    )
    .fetch_all(pool)
    .await?;

    Ok(parents)
}
