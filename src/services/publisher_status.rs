//! GAM status changes requested by users

use tracing::info;
use uuid::Uuid;

use crate::auth::AuthInfo;
use crate::error::StatusChangeError;
use crate::services::store::PublisherStore;
use crate::types::{GamStatus, Publisher};

/// Change a publisher's GAM status on behalf of `actor`.
///
/// Administrators may set any status. Partners may only act on their own
/// publishers and only along the partner transition table (never out of
/// `pending`). Re-applying the current status is accepted without a write
/// when the role could have chosen that status.
pub async fn change_gam_status(
    store: &dyn PublisherStore,
    actor: &AuthInfo,
    publisher_id: Uuid,
    requested: &str,
) -> Result<Publisher, StatusChangeError> {
    let target = GamStatus::from_str(requested)
        .ok_or_else(|| StatusChangeError::UnknownStatus(requested.to_string()))?;

    let publisher = store
        .get_publisher(publisher_id)
        .await?
        .ok_or(StatusChangeError::NotFound(publisher_id))?;

    if !actor.can_access(&publisher) {
        return Err(StatusChangeError::NotOwner(publisher_id));
    }

    if !publisher
        .gam_status
        .available_transitions(actor.role)
        .contains(&target)
    {
        return Err(StatusChangeError::Forbidden {
            role: actor.role,
            from: publisher.gam_status,
            to: target,
        });
    }

    if publisher.gam_status == target {
        return Ok(publisher);
    }

    let updated = store
        .update_gam_status(publisher_id, target)
        .await?
        .ok_or(StatusChangeError::NotFound(publisher_id))?;

    info!(
        "Publisher {} GAM status {} -> {} by {}",
        publisher_id,
        publisher.gam_status.as_str(),
        target.as_str(),
        actor.user_id
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use crate::types::{DataFetchStatus, ServiceKeyStatus, UserRole};
    use chrono::Utc;

    fn publisher(status: GamStatus, partner_id: Option<Uuid>) -> Publisher {
        Publisher {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            domain: "acme.com".to_string(),
            contact_email: Some("ops@acme.com".to_string()),
            network_code: Some("123".to_string()),
            revenue_share: Some(30.0),
            mcm_parent_id: None,
            notes: None,
            gam_status: status,
            service_key_status: ServiceKeyStatus::Verified,
            service_key_verified_at: Some(Utc::now()),
            data_fetch_status: DataFetchStatus::Pending,
            created_by: None,
            partner_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn actor(role: UserRole, partner_id: Option<Uuid>) -> AuthInfo {
        AuthInfo {
            user_id: Uuid::new_v4(),
            role,
            partner_id,
        }
    }

    fn seeded(status: GamStatus, partner_id: Option<Uuid>) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let p = publisher(status, partner_id);
        let id = p.id;
        store.seed_publisher(p);
        (store, id)
    }

    #[tokio::test]
    async fn admin_can_set_any_status() {
        let (store, id) = seeded(GamStatus::Pending, None);
        let updated = change_gam_status(&store, &actor(UserRole::Admin, None), id, "withdrawn")
            .await
            .unwrap();
        assert_eq!(updated.gam_status, GamStatus::Withdrawn);
    }

    #[tokio::test]
    async fn partner_blocked_while_pending() {
        let partner = Uuid::new_v4();
        let (store, id) = seeded(GamStatus::Pending, Some(partner));
        let err = change_gam_status(&store, &actor(UserRole::Partner, Some(partner)), id, "accepted")
            .await
            .unwrap_err();
        assert!(matches!(err, StatusChangeError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn partner_moves_within_allowed_table() {
        let partner = Uuid::new_v4();
        let (store, id) = seeded(GamStatus::Approved, Some(partner));
        let updated = change_gam_status(&store, &actor(UserRole::Partner, Some(partner)), id, "accepted")
            .await
            .unwrap();
        assert_eq!(updated.gam_status, GamStatus::Accepted);
    }

    #[tokio::test]
    async fn partner_cannot_set_invited() {
        let partner = Uuid::new_v4();
        let (store, id) = seeded(GamStatus::Rejected, Some(partner));
        let err = change_gam_status(&store, &actor(UserRole::Partner, Some(partner)), id, "invited")
            .await
            .unwrap_err();
        assert!(matches!(err, StatusChangeError::Forbidden { to: GamStatus::Invited, .. }));
    }

    #[tokio::test]
    async fn partner_cannot_touch_other_partners_publisher() {
        let (store, id) = seeded(GamStatus::Approved, Some(Uuid::new_v4()));
        let err = change_gam_status(&store, &actor(UserRole::Partner, Some(Uuid::new_v4())), id, "accepted")
            .await
            .unwrap_err();
        assert!(matches!(err, StatusChangeError::NotOwner(_)));
    }

    #[tokio::test]
    async fn viewer_is_refused() {
        let (store, id) = seeded(GamStatus::Approved, None);
        let err = change_gam_status(&store, &actor(UserRole::Viewer, None), id, "accepted")
            .await
            .unwrap_err();
        assert!(matches!(err, StatusChangeError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn same_status_is_a_no_op() {
        let partner = Uuid::new_v4();
        let (store, id) = seeded(GamStatus::Approved, Some(partner));
        let unchanged = change_gam_status(&store, &actor(UserRole::Partner, Some(partner)), id, "approved")
            .await
            .unwrap();
        assert_eq!(unchanged.gam_status, GamStatus::Approved);

        let (store, id) = seeded(GamStatus::Pending, None);
        let unchanged = change_gam_status(&store, &actor(UserRole::Admin, None), id, "pending")
            .await
            .unwrap();
        assert_eq!(unchanged.gam_status, GamStatus::Pending);
    }

    #[tokio::test]
    async fn partner_cannot_reapply_pending() {
        let partner = Uuid::new_v4();
        let (store, id) = seeded(GamStatus::Pending, Some(partner));
        let err = change_gam_status(&store, &actor(UserRole::Partner, Some(partner)), id, "pending")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StatusChangeError::Forbidden { from: GamStatus::Pending, to: GamStatus::Pending, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_status_and_missing_publisher() {
        let (store, id) = seeded(GamStatus::Approved, None);
        let admin = actor(UserRole::Admin, None);
        assert!(matches!(
            change_gam_status(&store, &admin, id, "archived").await.unwrap_err(),
            StatusChangeError::UnknownStatus(_)
        ));
        assert!(matches!(
            change_gam_status(&store, &admin, Uuid::new_v4(), "approved").await.unwrap_err(),
            StatusChangeError::NotFound(_)
        ));
    }
}
