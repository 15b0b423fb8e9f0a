//! Durable job queue and bulk mutation drivers
//!
//! Jobs live in the store; the runner promotes at most one per account to
//! running, executes it on a worker thread, and records terminal state.
//! Workers observe cancellation at chunk boundaries only, so an in-flight
//! provider call always completes before the job stops.

mod bulk;
mod runner;

pub use runner::JobRunner;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::models::SyncStatus;
use crate::throttle::ThrottleStats;

/// Cooperative stop flag checked at chunk boundaries
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-account snapshot for the health signal
#[derive(Debug, Clone, Serialize)]
pub struct AccountHealth {
    pub account_id: String,
    pub sync_status: SyncStatus,
    pub processed_messages: i64,
    pub total_messages: i64,
    pub last_error: Option<String>,
    /// Absent until the account has run a job this process lifetime
    #[serde(skip)]
    pub throttle: Option<ThrottleStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let observer = token.clone();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(observer.is_cancelled());
    }
}
