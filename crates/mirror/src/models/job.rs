//! Durable job model for sync and bulk mutation work

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::filter::EmailFilter;

/// Generate an opaque job identifier
pub fn new_job_id() -> String {
    super::account::new_account_id()
}

/// What kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Sync,
    Trash,
    Delete,
    Archive,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Sync => "sync",
            JobType::Trash => "trash",
            JobType::Delete => "delete",
            JobType::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(JobType::Sync),
            "trash" => Some(JobType::Trash),
            "delete" => Some(JobType::Delete),
            "archive" => Some(JobType::Archive),
            _ => None,
        }
    }
}

/// Job lifecycle state
///
/// `pending → running → (completed | failed | cancelled | paused)`;
/// `paused → running` on resume, `failed → running` on bounded retry.
/// Terminal states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether this state can never transition again
    ///
    /// Failed is not terminal: a failed job may re-run on bounded retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Whether the job is finished, successfully or not
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Payload for bulk mutation jobs
///
/// Either a saved filter or an explicit id list selects the targets.
/// Label jobs additionally carry the label deltas to apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkPayload {
    pub filter: Option<EmailFilter>,
    pub ids: Option<Vec<String>>,
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
}

/// A durable record of an enqueued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// JSON-serialized [`BulkPayload`] for mutation jobs
    pub payload: Option<String>,
    pub total_messages: i64,
    pub processed_messages: i64,
    /// Opaque provider page cursor, persisted for resumability
    pub next_page_token: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: i64,
    /// Epoch ms of the most recent resume
    pub resumed_at: Option<i64>,
    /// Snapshot of processed_messages at resume, for post-resume ETA math
    pub processed_at_resume: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Job {
    /// Create a new pending job
    pub fn new(
        account_id: impl Into<String>,
        user_id: impl Into<String>,
        job_type: JobType,
        payload: Option<BulkPayload>,
    ) -> Self {
        Self {
            id: new_job_id(),
            account_id: account_id.into(),
            user_id: user_id.into(),
            job_type,
            status: JobStatus::Pending,
            payload: payload.map(|p| serde_json::to_string(&p).unwrap_or_default()),
            total_messages: 0,
            processed_messages: 0,
            next_page_token: None,
            last_error: None,
            retry_count: 0,
            resumed_at: None,
            processed_at_resume: None,
            created_at: Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Decode the bulk payload, if any
    pub fn bulk_payload(&self) -> Option<BulkPayload> {
        self.payload
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        // A failed job can still re-run on bounded retry
        assert!(!JobStatus::Failed.is_terminal());
        assert!(JobStatus::Failed.is_settled());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = BulkPayload {
            filter: Some(EmailFilter {
                sender_email: Some("x@y.z".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let job = Job::new("a1", "u1", JobType::Trash, Some(payload.clone()));
        assert_eq!(job.bulk_payload(), Some(payload));
    }

    #[test]
    fn test_job_without_payload() {
        let job = Job::new("a1", "u1", JobType::Sync, None);
        assert!(job.payload.is_none());
        assert!(job.bulk_payload().is_none());
        assert_eq!(job.status, JobStatus::Pending);
    }
}
