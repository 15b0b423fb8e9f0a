//! Mirror crate - Gmail metadata mirroring for bulk mailbox cleanup
//!
//! This crate provides the mail-mirror core of Inboxorcist:
//! - Domain models (accounts, email records, filters, jobs)
//! - A multi-tenant relational metadata store with filter/aggregate queries
//! - A Gmail batch client speaking the multipart batch protocol
//! - An adaptive throttle that holds the request rate under per-user quota
//! - Full and incremental (history-based) sync engines
//! - A durable, resumable job runner for sync and bulk trash/delete
//!
//! This crate has no HTTP-server or UI dependencies; the API surface,
//! OAuth issuance flow, and agent wiring are collaborator concerns.

pub mod config;
pub mod crypto;
pub mod gmail;
pub mod jobs;
pub mod models;
pub mod storage;
pub mod sync;
pub mod throttle;

pub use config::MirrorConfig;
pub use crypto::{CryptoError, SecretBox};
pub use gmail::{AuthError, GmailClient, GmailError, MailApi, MessageFormat, TokenManager};
pub use jobs::{AccountHealth, CancelToken, JobRunner};
pub use models::{
    Account, Attachment, BulkPayload, EmailAddress, EmailFilter, EmailRecord, Job, JobStatus,
    JobType, SearchExpr, SyncStatus,
};
pub use storage::{
    BreakdownBy, BreakdownRow, BreakdownSort, EmailSort, MailboxStats, MetadataStore, Page,
    QuerySnapshot, SqliteStore, StoreError, StoredToken,
};
pub use sync::{SyncEngine, SyncError, SyncMode, SyncOutcome};
pub use throttle::{AdaptiveThrottle, ThrottleConfig, ThrottleStats};
