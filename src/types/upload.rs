//! Bulk publisher upload types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One data row of a publisher upload CSV, keyed by header name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherCsvRow {
    pub publisher_name: String,
    pub email: String,
    pub site_link: String,
    pub network_code: String,
    pub revenue_share: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_network_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Single field-level validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row: usize,
    pub field: String,
    pub message: String,
}

/// Outcome of validating one row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Human-readable summary, e.g. `email: Invalid email format, networkCode: ...`
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Pipeline phase reported through progress updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Validating,
    Verifying,
    Inserting,
    Queueing,
    Complete,
}

/// Progress update emitted while an upload runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadProgress {
    pub total: usize,
    pub current: usize,
    pub current_publisher: String,
    pub phase: UploadPhase,
}

/// Data shared by every failure kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub row: usize,
    pub data: PublisherCsvRow,
    pub error: String,
}

/// Row-level failure, tagged with the phase that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadFailure {
    Validation(FailureDetail),
    Verification(FailureDetail),
    Insertion(FailureDetail),
    Queue(FailureDetail),
}

/// Failure kind without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Validation,
    Verification,
    Insertion,
    Queue,
}

impl UploadFailure {
    pub fn detail(&self) -> &FailureDetail {
        match self {
            UploadFailure::Validation(d)
            | UploadFailure::Verification(d)
            | UploadFailure::Insertion(d)
            | UploadFailure::Queue(d) => d,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            UploadFailure::Validation(_) => FailureKind::Validation,
            UploadFailure::Verification(_) => FailureKind::Verification,
            UploadFailure::Insertion(_) => FailureKind::Insertion,
            UploadFailure::Queue(_) => FailureKind::Queue,
        }
    }

    #[cfg(test)]
    pub fn row(&self) -> usize {
        self.detail().row
    }
}

/// Aggregated result of one bulk upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadResult {
    pub total_rows: usize,
    /// Rows that were persisted as publishers
    pub success_count: usize,
    /// Rows that were not persisted (validation, verification or insertion)
    pub failure_count: usize,
    pub verification_failure_count: usize,
    pub queued_count: usize,
    pub failures: Vec<UploadFailure>,
}

impl BulkUploadResult {
    pub fn new(total_rows: usize) -> Self {
        Self {
            total_rows,
            ..Default::default()
        }
    }

    /// Record a failure and update the counters it affects.
    ///
    /// Queue failures leave `failure_count` alone: the publisher row exists.
    pub fn record(&mut self, failure: UploadFailure) {
        match failure.kind() {
            FailureKind::Validation | FailureKind::Insertion => self.failure_count += 1,
            FailureKind::Verification => {
                self.failure_count += 1;
                self.verification_failure_count += 1;
            }
            FailureKind::Queue => {}
        }
        self.failures.push(failure);
    }
}

/// Upload request sent by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadRequest {
    pub csv_content: String,
    #[serde(default)]
    pub partner_id: Option<Uuid>,
    #[serde(default)]
    pub default_parent_id: Option<Uuid>,
}

/// Downloadable CSV template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTemplateResponse {
    pub filename: String,
    pub content_type: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(row: usize) -> FailureDetail {
        FailureDetail {
            row,
            data: PublisherCsvRow::default(),
            error: "boom".to_string(),
        }
    }

    #[test]
    fn failure_serializes_with_type_tag() {
        let json = serde_json::to_value(UploadFailure::Verification(detail(3))).unwrap();
        assert_eq!(json["type"], "verification");
        assert_eq!(json["row"], 3);
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn record_counts_verification_separately() {
        let mut result = BulkUploadResult::new(3);
        result.record(UploadFailure::Validation(detail(1)));
        result.record(UploadFailure::Verification(detail(2)));
        assert_eq!(result.failure_count, 2);
        assert_eq!(result.verification_failure_count, 1);
        assert_eq!(result.failures.len(), 2);
    }

    #[test]
    fn queue_failure_does_not_count_as_row_failure() {
        let mut result = BulkUploadResult::new(1);
        result.record(UploadFailure::Queue(detail(1)));
        assert_eq!(result.failure_count, 0);
        assert_eq!(result.failures[0].kind(), FailureKind::Queue);
    }

    #[test]
    fn progress_uses_camel_case_and_lowercase_phase() {
        let progress = BulkUploadProgress {
            total: 5,
            current: 2,
            current_publisher: "Acme".to_string(),
            phase: UploadPhase::Verifying,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["currentPublisher"], "Acme");
        assert_eq!(json["phase"], "verifying");
    }

    #[test]
    fn validation_summary_joins_fields() {
        let result = ValidationResult::from_errors(vec![
            ValidationError { row: 2, field: "email".into(), message: "Invalid email format".into() },
            ValidationError { row: 2, field: "networkCode".into(), message: "Network code must be numeric".into() },
        ]);
        assert!(!result.valid);
        assert_eq!(
            result.summary(),
            "email: Invalid email format, networkCode: Network code must be numeric"
        );
    }
}
