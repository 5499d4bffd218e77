//! Publisher types and the GAM status lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Publisher status inside Google Ad Manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "gam_status", rename_all = "snake_case")]
pub enum GamStatus {
    Pending,
    Accepted,
    Approved,
    Invited,
    Rejected,
    Withdrawn,
    PolicyIssues,
    IvtIssues,
    NotApproved,
    Inactive,
}

impl GamStatus {
    pub const ALL: [GamStatus; 10] = [
        GamStatus::Pending,
        GamStatus::Accepted,
        GamStatus::Approved,
        GamStatus::Invited,
        GamStatus::Rejected,
        GamStatus::Withdrawn,
        GamStatus::PolicyIssues,
        GamStatus::IvtIssues,
        GamStatus::NotApproved,
        GamStatus::Inactive,
    ];

    /// States a partner may move a publisher out of
    const PARTNER_SOURCES: [GamStatus; 7] = [
        GamStatus::Approved,
        GamStatus::Invited,
        GamStatus::Rejected,
        GamStatus::Withdrawn,
        GamStatus::PolicyIssues,
        GamStatus::IvtIssues,
        GamStatus::NotApproved,
    ];

    /// States a partner may move a publisher into
    const PARTNER_TARGETS: [GamStatus; 8] = [
        GamStatus::Pending,
        GamStatus::Accepted,
        GamStatus::Inactive,
        GamStatus::Approved,
        GamStatus::Rejected,
        GamStatus::PolicyIssues,
        GamStatus::IvtIssues,
        GamStatus::NotApproved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GamStatus::Pending => "pending",
            GamStatus::Accepted => "accepted",
            GamStatus::Approved => "approved",
            GamStatus::Invited => "invited",
            GamStatus::Rejected => "rejected",
            GamStatus::Withdrawn => "withdrawn",
            GamStatus::PolicyIssues => "policy_issues",
            GamStatus::IvtIssues => "ivt_issues",
            GamStatus::NotApproved => "not_approved",
            GamStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    /// Target states `role` may choose while the publisher is in `self`.
    pub fn available_transitions(&self, role: UserRole) -> Vec<GamStatus> {
        match role {
            UserRole::SuperAdmin | UserRole::Admin => Self::ALL.to_vec(),
            UserRole::Partner if Self::PARTNER_SOURCES.contains(self) => {
                Self::PARTNER_TARGETS.to_vec()
            }
            UserRole::Partner | UserRole::Viewer => Vec::new(),
        }
    }
}

/// Whether the service account key was verified against GAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "service_key_status", rename_all = "snake_case")]
pub enum ServiceKeyStatus {
    Unknown,
    Verified,
    Active,
    Invalid,
    Error,
}

/// Progress of the historical data fetch for a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "data_fetch_status", rename_all = "snake_case")]
pub enum DataFetchStatus {
    Pending,
    Fetching,
    Completed,
    Failed,
}

/// Back-office user role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    Partner,
    Viewer,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(UserRole::SuperAdmin),
            "admin" => Some(UserRole::Admin),
            "partner" => Some(UserRole::Partner),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::SuperAdmin | UserRole::Admin)
    }
}

/// Publisher entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Publisher {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub contact_email: Option<String>,
    pub network_code: Option<String>,
    pub revenue_share: Option<f64>,
    pub mcm_parent_id: Option<Uuid>,
    pub notes: Option<String>,
    pub gam_status: GamStatus,
    pub service_key_status: ServiceKeyStatus,
    pub service_key_verified_at: Option<DateTime<Utc>>,
    pub data_fetch_status: DataFetchStatus,
    pub created_by: Option<Uuid>,
    pub partner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a publisher created by a bulk upload
#[derive(Debug, Clone)]
pub struct NewPublisher {
    pub name: String,
    pub domain: String,
    pub contact_email: String,
    pub network_code: String,
    pub revenue_share: f64,
    pub mcm_parent_id: Option<Uuid>,
    pub notes: Option<String>,
    pub service_key_verified_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub partner_id: Option<Uuid>,
}

/// Multi-customer-management parent account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ParentAccount {
    pub id: Uuid,
    pub name: String,
    pub parent_network_code: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Request to change a publisher's GAM status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGamStatusRequest {
    pub publisher_id: Uuid,
    pub status: String,
}
