//! Account model representing one user's connection to one mailbox

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Alphabet for opaque account/job identifiers
const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

/// Generate an opaque 21-character identifier
pub fn new_account_id() -> String {
    let mut rng = rand::rng();
    (0..21)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Sync lifecycle state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    StatsOnly,
    Syncing,
    Completed,
    Error,
    AuthExpired,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::StatsOnly => "stats_only",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
            SyncStatus::AuthExpired => "auth_expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncStatus::Idle),
            "stats_only" => Some(SyncStatus::StatsOnly),
            "syncing" => Some(SyncStatus::Syncing),
            "completed" => Some(SyncStatus::Completed),
            "error" => Some(SyncStatus::Error),
            "auth_expired" => Some(SyncStatus::AuthExpired),
            _ => None,
        }
    }
}

/// A registered mailbox connection
///
/// Owns (via cascade) all mirrored emails, sender aggregates, jobs and
/// tokens for that mailbox. Unique on (user_id, provider, email).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque 21-character identifier
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Mail provider ("gmail")
    pub provider: String,
    /// Mailbox address
    pub email: String,
    pub sync_status: SyncStatus,
    /// Epoch ms when the current/last sync started
    pub sync_started_at: Option<i64>,
    /// Epoch ms when the last sync completed
    pub sync_completed_at: Option<i64>,
    /// Human-readable error from the last failed sync
    pub sync_error: Option<String>,
    /// Provider delta cursor; non-decreasing for the account's lifetime
    pub history_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    /// Create a new Gmail account record
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: new_account_id(),
            user_id: user_id.into(),
            provider: "gmail".to_string(),
            email: email.into(),
            sync_status: SyncStatus::Idle,
            sync_started_at: None,
            sync_completed_at: None,
            sync_error: None,
            history_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_id_shape() {
        let id = new_account_id();
        assert_eq!(id.len(), 21);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
        assert_ne!(new_account_id(), new_account_id());
    }

    #[test]
    fn test_sync_status_round_trip() {
        for status in [
            SyncStatus::Idle,
            SyncStatus::StatsOnly,
            SyncStatus::Syncing,
            SyncStatus::Completed,
            SyncStatus::Error,
            SyncStatus::AuthExpired,
        ] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("bogus"), None);
    }

    #[test]
    fn test_new_account_defaults() {
        let account = Account::new("u1", "user@example.com");
        assert_eq!(account.provider, "gmail");
        assert_eq!(account.sync_status, SyncStatus::Idle);
        assert!(account.history_id.is_none());
    }
}
