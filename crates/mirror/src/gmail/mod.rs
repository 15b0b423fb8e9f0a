//! Gmail API integration
//!
//! This module provides:
//! - typed Gmail REST response models
//! - the multipart batch codec
//! - an HTTP client for the endpoints the mirror consumes
//! - the token vault that fronts OAuth refresh

mod auth;
mod batch;
mod client;
mod normalize;

pub use auth::{AuthError, TokenManager};
pub use batch::{encode_batch_request, new_boundary, parse_batch_response};
pub use client::GmailClient;
pub use normalize::normalize_metadata;

use std::time::Duration;
use thiserror::Error;

/// Pseudo-status recorded on every item when the whole batch request failed
pub const BATCH_FAILED: &str = "BATCH_FAILED";

#[derive(Debug, Error)]
pub enum GmailError {
    /// Bearer rejected; callers refresh once, then mark the account expired
    #[error("authorization rejected")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited {
        /// Parsed Retry-After, when the server sent one
        retry_after: Option<Duration>,
    },
    /// The delta cursor fell off Gmail's retention window
    #[error("history cursor expired")]
    HistoryExpired,
    #[error("resource not found")]
    NotFound,
    #[error("too many ids for one call: {0}")]
    TooManyIds(usize),
    #[error("gmail returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    BadResponse(String),
}

/// Requested payload shape for messages.get
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Metadata,
    Full,
    Minimal,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
            MessageFormat::Minimal => "minimal",
        }
    }
}

/// Per-item failure inside an otherwise delivered batch
#[derive(Debug, Clone, PartialEq)]
pub struct ItemError {
    pub code: u16,
    pub message: String,
    pub status: String,
}

/// One slot of a batch result, same position as the requested id
#[derive(Debug)]
pub struct BatchItem {
    pub id: String,
    pub result: Result<api::GmailMessage, ItemError>,
}

/// A delivered metadata batch plus its measured wall-clock latency
#[derive(Debug)]
pub struct BatchFetchOutcome {
    pub items: Vec<BatchItem>,
    pub latency: Duration,
}

/// The Gmail surface the sync engine and bulk drivers consume
///
/// [`GmailClient`] is the production implementation; tests drive the
/// engine with a scripted fake.
pub trait MailApi: Send + Sync {
    fn get_profile(&self, token: &str) -> Result<api::Profile, GmailError>;

    /// List message ids including spam and trash
    fn list_messages(
        &self,
        token: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<api::ListMessagesResponse, GmailError>;

    fn list_history(
        &self,
        token: &str,
        start_history_id: i64,
        page_token: Option<&str>,
    ) -> Result<api::HistoryResponse, GmailError>;

    /// Fetch up to 100 messages through the multipart batch endpoint
    fn fetch_metadata(&self, token: &str, ids: &[String]) -> Result<BatchFetchOutcome, GmailError>;

    /// Add/remove labels on up to 1,000 messages
    fn batch_modify(
        &self,
        token: &str,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), GmailError>;

    /// Permanently delete up to 1,000 messages
    fn batch_delete(&self, token: &str, ids: &[String]) -> Result<(), GmailError>;

    fn list_labels(&self, token: &str) -> Result<Vec<api::GmailLabel>, GmailError>;
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from users.getProfile
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Profile {
        pub email_address: Option<String>,
        pub messages_total: Option<u64>,
        pub history_id: String,
    }

    /// Response from listing messages
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u64>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Full message from the Gmail API
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        /// Epoch ms as a decimal string
        pub internal_date: Option<String>,
        pub size_estimate: Option<i64>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers and body parts
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (base64url data when inline)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<i64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Message part (for multipart messages)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from users.history.list
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// One change-log entry
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessage>>,
        pub messages_deleted: Option<Vec<HistoryMessage>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
        pub labels_removed: Option<Vec<HistoryLabelChange>>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: MessageRef,
        pub label_ids: Vec<String>,
    }

    /// Response from users.labels.list
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<GmailLabel>>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailLabel {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub label_type: Option<String>,
    }

    /// Request body for messages.batchModify
    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchModifyRequest {
        pub ids: Vec<String>,
        pub add_label_ids: Vec<String>,
        pub remove_label_ids: Vec<String>,
    }

    /// Request body for messages.batchDelete
    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchDeleteRequest {
        pub ids: Vec<String>,
    }

    /// Error envelope Gmail embeds in failed batch parts
    #[derive(Debug, Clone, Deserialize)]
    pub struct ErrorEnvelope {
        pub error: ErrorBody,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ErrorBody {
        pub code: Option<u16>,
        pub message: Option<String>,
        pub status: Option<String>,
    }
}
