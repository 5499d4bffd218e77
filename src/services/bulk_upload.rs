//! Bulk publisher upload pipeline
//!
//! Phases run strictly one after another:
//! 1. validating: every row is checked before any external call
//! 2. verifying / inserting: GAM access check, then insert (bounded concurrency)
//! 3. queueing: historical fetch enqueued for every inserted publisher
//! 4. complete
//!
//! Row-level problems end up in `BulkUploadResult::failures`; only setup
//! failures (bad CSV, parent account lookup) abort the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::UploadError;
use crate::services::csv_parser::parse_publisher_csv;
use crate::services::queue::QueueService;
use crate::services::store::PublisherStore;
use crate::services::validation::{extract_domain, parse_revenue_share, validate_publisher_row};
use crate::services::verification::AccessVerifier;
use crate::types::{
    BulkUploadProgress, BulkUploadResult, FailureDetail, NewPublisher, PublisherCsvRow, UploadFailure,
    UploadPhase,
};

/// Progress sink; called from the pipeline task
pub type ProgressFn<'a> = &'a (dyn Fn(BulkUploadProgress) + Send + Sync);

/// Who is uploading and where new publishers belong
#[derive(Debug, Clone, Copy)]
pub struct UploadContext {
    pub user_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub default_parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    /// Rows verified and inserted at the same time
    pub verify_concurrency: usize,
    /// Upper bound for one GAM verification call
    pub verify_timeout: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            verify_concurrency: 1,
            verify_timeout: Duration::from_secs(15),
        }
    }
}

/// Row that passed validation
struct ValidRow {
    row_number: usize,
    row: PublisherCsvRow,
}

/// Row that became a publisher
struct InsertedRow {
    row_number: usize,
    row: PublisherCsvRow,
    publisher_id: Uuid,
}

pub struct BulkUploader {
    publishers: Arc<dyn PublisherStore>,
    verifier: Arc<dyn AccessVerifier>,
    queue: QueueService,
    settings: UploadSettings,
}

impl BulkUploader {
    pub fn new(
        publishers: Arc<dyn PublisherStore>,
        verifier: Arc<dyn AccessVerifier>,
        queue: QueueService,
        settings: UploadSettings,
    ) -> Self {
        Self {
            publishers,
            verifier,
            queue,
            settings,
        }
    }

    /// Parse `csv_content` and run the pipeline over its rows.
    pub async fn run_csv(
        &self,
        csv_content: &str,
        context: &UploadContext,
        on_progress: ProgressFn<'_>,
    ) -> Result<BulkUploadResult, UploadError> {
        let rows = parse_publisher_csv(csv_content)?;
        self.run(rows, context, on_progress).await
    }

    /// Run all phases over already parsed rows.
    pub async fn run(
        &self,
        rows: Vec<PublisherCsvRow>,
        context: &UploadContext,
        on_progress: ProgressFn<'_>,
    ) -> Result<BulkUploadResult, UploadError> {
        let total = rows.len();
        let mut result = BulkUploadResult::new(total);
        info!("Bulk upload started: {} rows, user {}", total, context.user_id);

        let parents = self.parent_mapping().await?;

        // Phase 1: validate everything
        on_progress(progress(total, 0, "", UploadPhase::Validating));
        let mut valid_rows = Vec::with_capacity(total);
        for (index, row) in rows.into_iter().enumerate() {
            let row_number = index + 1;
            let validation = validate_publisher_row(&row, row_number);
            if validation.valid {
                valid_rows.push(ValidRow { row_number, row });
            } else {
                debug!("Row {} failed validation: {}", row_number, validation.summary());
                result.record(UploadFailure::Validation(FailureDetail {
                    row: row_number,
                    data: row,
                    error: validation.summary(),
                }));
            }
        }

        // Phase 2: verify and insert, results kept in file order
        let concurrency = self.settings.verify_concurrency.max(1);
        let parents = &parents;
        let outcomes: Vec<Result<InsertedRow, UploadFailure>> = stream::iter(
            valid_rows
                .into_iter()
                .enumerate()
                .map(|(index, valid)| self.verify_and_insert(index + 1, total, valid, parents, context, on_progress)),
        )
        .buffered(concurrency)
        .collect()
        .await;

        let mut inserted = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(row) => {
                    result.success_count += 1;
                    inserted.push(row);
                }
                Err(failure) => result.record(failure),
            }
        }

        // Phase 3: queue historical fetches
        on_progress(progress(total, total, "", UploadPhase::Queueing));
        for InsertedRow { row_number, row, publisher_id } in inserted {
            match self.queue.queue_publisher(publisher_id).await {
                Ok(_) => result.queued_count += 1,
                Err(e) => {
                    warn!("Row {}: publisher {} was not queued: {:#}", row_number, publisher_id, e);
                    result.record(UploadFailure::Queue(FailureDetail {
                        row: row_number,
                        data: row,
                        error: format!("Failed to queue for data fetch: {:#}", e),
                    }));
                }
            }
        }

        on_progress(progress(total, total, "", UploadPhase::Complete));
        info!(
            "Bulk upload finished: {} inserted, {} failed ({} verification), {} queued",
            result.success_count, result.failure_count, result.verification_failure_count, result.queued_count
        );
        Ok(result)
    }

    /// Active parent accounts keyed by parent network code, read once per batch
    async fn parent_mapping(&self) -> Result<HashMap<String, Uuid>, UploadError> {
        let parents = self
            .publishers
            .active_parent_accounts()
            .await
            .map_err(UploadError::ParentAccounts)?;

        Ok(parents
            .into_iter()
            .map(|parent| (parent.parent_network_code, parent.id))
            .collect())
    }

    async fn verify_and_insert(
        &self,
        position: usize,
        total: usize,
        valid: ValidRow,
        parents: &HashMap<String, Uuid>,
        context: &UploadContext,
        on_progress: ProgressFn<'_>,
    ) -> Result<InsertedRow, UploadFailure> {
        let ValidRow { row_number, row } = valid;
        on_progress(progress(total, position, &row.publisher_name, UploadPhase::Verifying));

        if let Err(reason) = self.verify(&row.network_code).await {
            debug!("Row {} failed verification: {}", row_number, reason);
            return Err(UploadFailure::Verification(FailureDetail {
                row: row_number,
                data: row,
                error: format!("GAM verification failed: {}", reason),
            }));
        }

        on_progress(progress(total, position, &row.publisher_name, UploadPhase::Inserting));
        let publisher = new_publisher(&row, parents, context);
        match self.publishers.insert_publisher(&publisher).await {
            Ok(created) => {
                debug!("Row {} inserted as publisher {}", row_number, created.id);
                Ok(InsertedRow {
                    row_number,
                    row,
                    publisher_id: created.id,
                })
            }
            Err(e) => {
                warn!("Row {} insert failed: {:#}", row_number, e);
                Err(UploadFailure::Insertion(FailureDetail {
                    row: row_number,
                    data: row,
                    error: format!("{:#}", e),
                }))
            }
        }
    }

    /// `Err` carries the reason access could not be confirmed
    async fn verify(&self, network_code: &str) -> Result<(), String> {
        let timeout = self.settings.verify_timeout;
        match tokio::time::timeout(timeout, self.verifier.verify_access(network_code)).await {
            Err(_) => Err(format!("timeout after {}s", timeout.as_secs_f64())),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Ok(Ok(verification)) if verification.is_active() => Ok(()),
            Ok(Ok(verification)) => Err(verification
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "Unauthorized access".to_string())),
        }
    }
}

fn progress(total: usize, current: usize, publisher: &str, phase: UploadPhase) -> BulkUploadProgress {
    BulkUploadProgress {
        total,
        current,
        current_publisher: publisher.to_string(),
        phase,
    }
}

/// Parent from the row's parent network code, else the caller's default
fn resolve_parent(
    row: &PublisherCsvRow,
    parents: &HashMap<String, Uuid>,
    default_parent_id: Option<Uuid>,
) -> Option<Uuid> {
    row.parent_network_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .and_then(|code| parents.get(code).copied())
        .or(default_parent_id)
}

fn new_publisher(
    row: &PublisherCsvRow,
    parents: &HashMap<String, Uuid>,
    context: &UploadContext,
) -> NewPublisher {
    NewPublisher {
        name: row.publisher_name.trim().to_string(),
        domain: extract_domain(&row.site_link),
        contact_email: row.email.trim().to_string(),
        network_code: row.network_code.trim().to_string(),
        // Validated in phase 1
        revenue_share: parse_revenue_share(&row.revenue_share).unwrap_or_default(),
        mcm_parent_id: resolve_parent(row, parents, context.default_parent_id),
        notes: row
            .comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        service_key_verified_at: Utc::now(),
        created_by: context.user_id,
        partner_id: context.partner_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsvError;
    use crate::services::store::MemoryStore;
    use crate::services::verification::MockAccessVerifier;
    use crate::types::{FailureKind, GamStatus, ServiceKeyStatus};
    use parking_lot::Mutex;

    const HEADER: &str = "publisherName,email,siteLink,networkCode,revenueShare,parentNetworkCode,comments";

    fn row(name: &str, email: &str, network_code: &str) -> PublisherCsvRow {
        PublisherCsvRow {
            publisher_name: name.to_string(),
            email: email.to_string(),
            site_link: format!("https://www.{}.com/home", name.to_lowercase()),
            network_code: network_code.to_string(),
            revenue_share: "30".to_string(),
            parent_network_code: None,
            comments: None,
        }
    }

    fn context() -> UploadContext {
        UploadContext {
            user_id: Uuid::new_v4(),
            partner_id: None,
            default_parent_id: None,
        }
    }

    fn uploader(store: &Arc<MemoryStore>, verifier: MockAccessVerifier, settings: UploadSettings) -> BulkUploader {
        let queue = QueueService::new(store.clone(), store.clone());
        BulkUploader::new(store.clone(), Arc::new(verifier), queue, settings)
    }

    fn ignore(_: BulkUploadProgress) {}

    fn kinds(result: &BulkUploadResult) -> Vec<(usize, FailureKind)> {
        result.failures.iter().map(|f| (f.row(), f.kind())).collect()
    }

    #[tokio::test]
    async fn mixed_batch_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let uploader = uploader(&store, MockAccessVerifier::new().with_invalid("300"), UploadSettings::default());
        let csv = format!(
            "{HEADER}\nGood,good@good.com,good.com,100,30,,\nBadEmail,not-an-email,bad.com,200,30,,\nNoAccess,no@access.com,noaccess.com,300,30,,"
        );

        let result = uploader.run_csv(&csv, &context(), &ignore).await.unwrap();

        assert_eq!(result.total_rows, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert_eq!(result.verification_failure_count, 1);
        assert_eq!(result.queued_count, 1);
        assert_eq!(
            kinds(&result),
            vec![(2, FailureKind::Validation), (3, FailureKind::Verification)]
        );
        assert_eq!(store.publishers().len(), 1);
        assert_eq!(store.queue_items().len(), 1);
    }

    #[tokio::test]
    async fn verification_and_insertion_failures_are_counted_per_row() {
        let store = Arc::new(MemoryStore::new());
        store.fail_insert_for("3000");
        let uploader = uploader(&store, MockAccessVerifier::new().with_invalid("2000"), UploadSettings::default());
        let rows = vec![
            row("One", "one@one.com", "1000"),
            row("Two", "two@two.com", "2000"),
            row("Three", "three@three.com", "3000"),
            row("Four", "four@four.com", "4000"),
        ];

        let result = uploader.run(rows, &context(), &ignore).await.unwrap();

        assert_eq!(result.success_count, result.total_rows - 2);
        assert_eq!(result.failure_count, 2);
        assert_eq!(
            kinds(&result),
            vec![(2, FailureKind::Verification), (3, FailureKind::Insertion)]
        );
        assert_eq!(result.success_count + result.failure_count, result.total_rows);
    }

    #[tokio::test]
    async fn verification_error_message_uses_reason_or_default() {
        let store = Arc::new(MemoryStore::new());
        let uploader = uploader(
            &store,
            MockAccessVerifier::new().with_invalid("1").with_failure("2"),
            UploadSettings::default(),
        );
        let rows = vec![row("A", "a@a.com", "1"), row("B", "b@b.com", "2")];

        let result = uploader.run(rows, &context(), &ignore).await.unwrap();

        assert_eq!(result.verification_failure_count, 2);
        let messages: Vec<&str> = result.failures.iter().map(|f| f.detail().error.as_str()).collect();
        assert_eq!(
            messages[0],
            "GAM verification failed: Service account is not a user on this network"
        );
        assert_eq!(messages[1], "GAM verification failed: verification function unavailable");
    }

    #[tokio::test]
    async fn slow_verification_times_out_as_verification_failure() {
        let store = Arc::new(MemoryStore::new());
        let settings = UploadSettings {
            verify_concurrency: 1,
            verify_timeout: Duration::from_millis(50),
        };
        let uploader = uploader(
            &store,
            MockAccessVerifier::new().with_delay("1", Duration::from_secs(5)),
            settings,
        );

        let result = uploader
            .run(vec![row("Slow", "s@slow.com", "1"), row("Fast", "f@fast.com", "2")], &context(), &ignore)
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(kinds(&result), vec![(1, FailureKind::Verification)]);
        assert!(result.failures[0].detail().error.contains("timeout"));
    }

    #[tokio::test]
    async fn queue_failure_keeps_publisher() {
        let store = Arc::new(MemoryStore::new());
        store.set_queue_unavailable(true);
        let uploader = uploader(&store, MockAccessVerifier::new(), UploadSettings::default());

        let result = uploader
            .run(vec![row("Acme", "a@acme.com", "1")], &context(), &ignore)
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 0);
        assert_eq!(result.queued_count, 0);
        assert_eq!(kinds(&result), vec![(1, FailureKind::Queue)]);
        assert!(result.failures[0]
            .detail()
            .error
            .starts_with("Failed to queue for data fetch:"));
        let publishers = store.publishers();
        assert_eq!(publishers.len(), 1);
        assert!(store.get_publisher(publishers[0].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn parent_lookup_failure_aborts_before_any_row() {
        let store = Arc::new(MemoryStore::new());
        store.set_parent_lookup_unavailable(true);
        let uploader = uploader(&store, MockAccessVerifier::new(), UploadSettings::default());

        let err = uploader
            .run(vec![row("Acme", "a@acme.com", "1")], &context(), &ignore)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ParentAccounts(_)));
        assert!(store.publishers().is_empty());
    }

    #[tokio::test]
    async fn csv_errors_abort_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let uploader = uploader(&store, MockAccessVerifier::new(), UploadSettings::default());

        let err = uploader.run_csv(HEADER, &context(), &ignore).await.unwrap_err();
        assert!(matches!(err, UploadError::Csv(CsvError::EmptyFile)));
    }

    #[tokio::test]
    async fn inserted_publisher_fields() {
        let store = Arc::new(MemoryStore::new().with_parent("Main MCM", "555"));
        let parent_id = store.parents()[0].id;
        let default_parent = Uuid::new_v4();
        let uploader = uploader(&store, MockAccessVerifier::new(), UploadSettings::default());
        let ctx = UploadContext {
            user_id: Uuid::new_v4(),
            partner_id: Some(Uuid::new_v4()),
            default_parent_id: Some(default_parent),
        };
        let mut mapped = row("Mapped", " m@mapped.com ", "1");
        mapped.parent_network_code = Some("555".to_string());
        mapped.comments = Some("  vip  ".to_string());
        let mut unmapped = row("Unmapped", "u@unmapped.com", "2");
        unmapped.parent_network_code = Some("999".to_string());

        uploader.run(vec![mapped, unmapped], &ctx, &ignore).await.unwrap();

        let publishers = store.publishers();
        let first = &publishers[0];
        assert_eq!(first.domain, "mapped.com");
        assert_eq!(first.contact_email.as_deref(), Some("m@mapped.com"));
        assert_eq!(first.mcm_parent_id, Some(parent_id));
        assert_eq!(first.notes.as_deref(), Some("vip"));
        assert_eq!(first.revenue_share, Some(30.0));
        assert_eq!(first.gam_status, GamStatus::Pending);
        assert_eq!(first.service_key_status, ServiceKeyStatus::Verified);
        assert_eq!(first.created_by, Some(ctx.user_id));
        assert_eq!(first.partner_id, ctx.partner_id);
        assert_eq!(publishers[1].mcm_parent_id, Some(default_parent));
    }

    #[test]
    fn parent_resolution_falls_back_to_none() {
        let parents = HashMap::new();
        let mut r = row("X", "x@x.com", "1");
        assert_eq!(resolve_parent(&r, &parents, None), None);
        r.parent_network_code = Some("  ".to_string());
        let default = Uuid::new_v4();
        assert_eq!(resolve_parent(&r, &parents, Some(default)), Some(default));
    }

    #[tokio::test]
    async fn progress_reports_phases_in_order() {
        let store = Arc::new(MemoryStore::new());
        let uploader = uploader(&store, MockAccessVerifier::new(), UploadSettings::default());
        let events = Mutex::new(Vec::new());
        let record = |p: BulkUploadProgress| events.lock().push(p);

        uploader
            .run(
                vec![row("A", "a@a.com", "1"), row("B", "bad", "2")],
                &context(),
                &record,
            )
            .await
            .unwrap();

        let events = events.into_inner();
        let phases: Vec<UploadPhase> = events.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                UploadPhase::Validating,
                UploadPhase::Verifying,
                UploadPhase::Inserting,
                UploadPhase::Queueing,
                UploadPhase::Complete,
            ]
        );
        assert_eq!(events[1].current, 1);
        assert_eq!(events[1].current_publisher, "A");
        assert!(events.iter().all(|p| p.total == 2));
        assert_eq!(events[4].current, 2);
    }

    #[tokio::test]
    async fn concurrent_verification_keeps_file_order() {
        let store = Arc::new(MemoryStore::new());
        let verifier = MockAccessVerifier::new()
            .with_delay("1", Duration::from_millis(100))
            .with_invalid("1")
            .with_invalid("3");
        let settings = UploadSettings {
            verify_concurrency: 3,
            ..UploadSettings::default()
        };
        let uploader = uploader(&store, verifier, settings);
        let rows = vec![
            row("One", "one@one.com", "1"),
            row("Two", "two@two.com", "2"),
            row("Three", "three@three.com", "3"),
        ];

        let result = uploader.run(rows, &context(), &ignore).await.unwrap();

        assert_eq!(
            kinds(&result),
            vec![(1, FailureKind::Verification), (3, FailureKind::Verification)]
        );
        assert_eq!(result.success_count, 1);
    }
}
