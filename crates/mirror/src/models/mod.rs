//! Domain models for the mail mirror

mod account;
mod email;
mod filter;
mod job;

pub use account::{Account, SyncStatus, new_account_id};
pub use email::{
    Attachment, EmailAddress, EmailRecord, LabelFlags, derive_category, derive_flags, labels,
};
pub use filter::{EmailFilter, SearchExpr};
pub use job::{BulkPayload, Job, JobStatus, JobType, new_job_id};
