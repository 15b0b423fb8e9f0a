//! Storage layer for the mail mirror
//!
//! [`MetadataStore`] is the repository seam; [`SqliteStore`] is the shipped
//! embedded engine. A server-backed engine would be a second implementation
//! of the same trait. Every operation is scoped by `account_id` — there is
//! no "current account" anywhere in this layer.

mod sqlite;

pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Account, EmailFilter, EmailRecord, Job, JobStatus, SyncStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Pagination for query results, 1-based pages
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit as i64
    }
}

/// Sort order for email queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSort {
    DateDesc,
    DateAsc,
    SizeDesc,
    SizeAsc,
}

impl Default for EmailSort {
    fn default() -> Self {
        EmailSort::DateDesc
    }
}

/// Dimension for aggregate breakdowns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownBy {
    Sender,
    Category,
    Month,
}

/// Sort for aggregate breakdowns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakdownSort {
    CountDesc,
    CountAsc,
    SizeDesc,
    SizeAsc,
}

/// One row of a breakdown result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownRow {
    pub key: String,
    pub label: String,
    pub count: i64,
    pub total_size: i64,
}

/// A row of the senders aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderAggregate {
    pub email: String,
    pub name: Option<String>,
    pub count: i64,
    pub total_size: i64,
}

/// A sender surfaced in the subscriptions view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionSender {
    pub email: String,
    pub name: Option<String>,
    pub count: i64,
    pub total_size: i64,
    pub unsubscribe_link: String,
}

/// Sealed OAuth token row; ciphertext in, ciphertext out
///
/// The token accessor is the only place these are opened.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: String,
    pub scope: Option<String>,
    /// Epoch ms when the access token expires
    pub expires_at: i64,
}

/// A cached filter snapshot an agent can refer back to by handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub query_id: String,
    pub account_id: String,
    pub filter: EmailFilter,
    pub match_count: i64,
    pub total_size: i64,
    pub created_at: i64,
}

/// Outcome of a label update against the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelUpdate {
    Applied,
    /// The row does not exist locally yet; callers decide whether to fetch
    NotFound,
}

/// Count plus byte sum for one cleanup cohort
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStat {
    pub count: i64,
    pub size_bytes: i64,
}

/// Per-category message counts over the inbox (trash and spam excluded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounts {
    pub promotions: i64,
    pub social: i64,
    pub updates: i64,
    pub forums: i64,
    pub primary: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SizeStats {
    #[serde(rename = "larger5MB")]
    pub larger_5mb: i64,
    #[serde(rename = "larger10MB")]
    pub larger_10mb: i64,
    #[serde(rename = "totalStorageBytes")]
    pub total_storage_bytes: i64,
    #[serde(rename = "trashStorageBytes")]
    pub trash_storage_bytes: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeStats {
    pub older_than_1_year: i64,
    pub older_than_2_years: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderStats {
    pub unique_count: i64,
}

/// Cleanup cohorts: rows that are neither trash, spam, starred nor important
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub promotions: CohortStat,
    pub social: CohortStat,
    pub updates: CohortStat,
    pub forums: CohortStat,
    /// Promotions that are already read
    pub read_promotions: CohortStat,
    pub older_than_1_year: CohortStat,
    pub older_than_2_years: CohortStat,
    #[serde(rename = "largerThan5MB")]
    pub larger_than_5mb: CohortStat,
    #[serde(rename = "largerThan10MB")]
    pub larger_than_10mb: CohortStat,
}

/// Per-account mailbox statistics
///
/// `total` and `unread` cover the inbox (trash and spam excluded); the
/// cleanup block additionally excludes starred and important rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStats {
    pub total: i64,
    pub unread: i64,
    pub categories: CategoryCounts,
    pub size: SizeStats,
    pub age: AgeStats,
    pub senders: SenderStats,
    pub trash: CohortStat,
    pub spam: CohortStat,
    pub cleanup: CleanupStats,
}

/// Repository contract for the metadata store
///
/// All bulk operations are idempotent; any write failure rolls back its
/// batch and leaves retry to the caller.
pub trait MetadataStore: Send + Sync {
    // === Accounts ===

    fn create_account(&self, account: &Account) -> StoreResult<()>;
    fn get_account(&self, account_id: &str) -> StoreResult<Option<Account>>;
    fn list_accounts(&self) -> StoreResult<Vec<Account>>;
    /// Set sync status; stamps sync_started_at / sync_completed_at and
    /// clears sync_error as appropriate for the target state
    fn set_sync_status(&self, account_id: &str, status: SyncStatus) -> StoreResult<()>;
    fn set_sync_error(&self, account_id: &str, message: &str) -> StoreResult<()>;
    /// Advance the delta cursor; smaller values than the stored one are ignored
    fn set_history_id(&self, account_id: &str, history_id: i64) -> StoreResult<()>;
    /// Remove the account and everything it owns (the deleted-email archive
    /// intentionally survives)
    fn delete_account(&self, account_id: &str) -> StoreResult<()>;

    // === OAuth tokens (ciphertext only at this layer) ===

    fn save_token(&self, account_id: &str, token: &StoredToken) -> StoreResult<()>;
    fn get_token(&self, account_id: &str) -> StoreResult<Option<StoredToken>>;

    // === Email mirror writes ===

    /// Wipe emails and sender aggregates for a full resync
    fn clear_emails(&self, account_id: &str) -> StoreResult<()>;
    /// Bulk upsert in one transaction; conflicting rows are fully replaced
    fn upsert_emails(&self, account_id: &str, records: &[EmailRecord]) -> StoreResult<()>;
    /// Apply a label delta and re-derive category plus flag columns
    fn update_labels(
        &self,
        account_id: &str,
        message_id: &str,
        added: &[String],
        removed: &[String],
    ) -> StoreResult<LabelUpdate>;
    /// Mirror a remote trash: add TRASH, drop INBOX on each row
    fn mark_trashed(&self, account_id: &str, ids: &[String]) -> StoreResult<()>;
    fn delete_by_ids(&self, account_id: &str, ids: &[String]) -> StoreResult<()>;
    /// Copy rows into the deleted-email archive, then remove them from the
    /// mirror, in one transaction; re-archival of the same ids is a no-op
    fn archive_and_delete(&self, account_id: &str, ids: &[String]) -> StoreResult<()>;
    /// Destroy and rebuild the senders aggregate from the mirror
    fn build_sender_aggregates(&self, account_id: &str) -> StoreResult<()>;

    // === Email mirror reads ===

    fn get_email(&self, account_id: &str, message_id: &str) -> StoreResult<Option<EmailRecord>>;
    fn query_emails(
        &self,
        account_id: &str,
        filter: &EmailFilter,
        page: Page,
        sort: EmailSort,
    ) -> StoreResult<Vec<EmailRecord>>;
    fn count_filtered(&self, account_id: &str, filter: &EmailFilter) -> StoreResult<i64>;
    fn sum_filtered_size(&self, account_id: &str, filter: &EmailFilter) -> StoreResult<i64>;
    fn ids_for_filter(&self, account_id: &str, filter: &EmailFilter) -> StoreResult<Vec<String>>;
    fn ids_with_size_for_filter(
        &self,
        account_id: &str,
        filter: &EmailFilter,
    ) -> StoreResult<Vec<(String, i64)>>;
    fn sender_suggestions(
        &self,
        account_id: &str,
        query: &str,
        limit: u32,
    ) -> StoreResult<Vec<SenderAggregate>>;
    fn senders_with_unsubscribe(
        &self,
        account_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<SubscriptionSender>>;
    fn distinct_categories(&self, account_id: &str) -> StoreResult<Vec<String>>;
    fn calculate_stats(&self, account_id: &str) -> StoreResult<MailboxStats>;
    /// Aggregate a filtered set along one dimension; limit is capped at 20
    fn analysis(
        &self,
        account_id: &str,
        filter: &EmailFilter,
        breakdown: BreakdownBy,
        sort: BreakdownSort,
        limit: u32,
    ) -> StoreResult<Vec<BreakdownRow>>;

    // === Deleted-email archive ===

    fn deleted_email_ids(&self, account_id: &str) -> StoreResult<Vec<String>>;

    // === Unsubscribed senders ===

    fn record_unsubscribed(&self, account_id: &str, sender_email: &str) -> StoreResult<()>;
    fn list_unsubscribed(&self, account_id: &str) -> StoreResult<Vec<String>>;

    // === Jobs ===

    fn insert_job(&self, job: &Job) -> StoreResult<()>;
    fn get_job(&self, job_id: &str) -> StoreResult<Option<Job>>;
    /// Compare-and-set the status; returns false if the job was not in one
    /// of the expected states. Stamps started_at / completed_at.
    fn transition_job(
        &self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> StoreResult<bool>;
    fn update_job_progress(
        &self,
        job_id: &str,
        processed: i64,
        total: Option<i64>,
    ) -> StoreResult<()>;
    fn set_job_page_token(&self, job_id: &str, token: Option<&str>) -> StoreResult<()>;
    /// Stamp resumed_at and snapshot processed_at_resume
    fn mark_job_resumed(&self, job_id: &str) -> StoreResult<()>;
    fn record_job_error(&self, job_id: &str, message: &str) -> StoreResult<()>;
    /// Jobs in any of the given states, oldest first
    fn jobs_in_status(&self, statuses: &[JobStatus]) -> StoreResult<Vec<Job>>;
    /// All jobs for one account, newest first
    fn jobs_for_account(&self, account_id: &str) -> StoreResult<Vec<Job>>;
    /// Whether the account has a pending/running/paused job of this type
    fn has_active_job(
        &self,
        account_id: &str,
        job_type: crate::models::JobType,
    ) -> StoreResult<bool>;

    // === Agent query cache ===

    fn save_query_snapshot(&self, snapshot: &QuerySnapshot) -> StoreResult<()>;
    fn get_query_snapshot(&self, query_id: &str) -> StoreResult<Option<QuerySnapshot>>;
}
