//! Sync engine reconciling the local mirror with Gmail
//!
//! Two modes, both carried by jobs: a full list-and-fetch sync that
//! establishes a baseline delta cursor, and an incremental sync driven by
//! the provider's change log.

mod engine;

pub use engine::SyncEngine;

use thiserror::Error;

use crate::gmail::GmailError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Token refresh permanently failed; the account needs re-auth
    #[error("authorization expired")]
    Auth,
    #[error(transparent)]
    Gmail(#[from] GmailError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chunk made no progress after {0} attempts")]
    Stalled(u32),
}

impl SyncError {
    pub(crate) fn from_gmail(error: GmailError) -> Self {
        match error {
            GmailError::Unauthorized => SyncError::Auth,
            other => SyncError::Gmail(other),
        }
    }
}

/// Which reconciliation path a sync run took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Delta,
}

/// Counters from one sync run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    /// Messages fetched from the provider
    pub fetched: usize,
    /// Mirror rows written
    pub upserted: usize,
    /// Mirror rows removed
    pub deleted: usize,
    /// Label deltas applied in place
    pub label_updates: usize,
    /// Ids skipped on permanent per-item errors
    pub skipped: usize,
    /// The run stopped at a chunk boundary on request
    pub cancelled: bool,
    /// A delta run fell back to a full resync
    pub escalated: bool,
}

impl SyncOutcome {
    pub(crate) fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            fetched: 0,
            upserted: 0,
            deleted: 0,
            label_updates: 0,
            skipped: 0,
            cancelled: false,
            escalated: false,
        }
    }
}
