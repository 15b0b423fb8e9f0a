//! Email record model and label-derived columns
//!
//! The `labels` array is canonical; `category` and the five boolean flags
//! are materialized from it for indexability. [`derive_category`] and
//! [`derive_flags`] are the single derivation points — every write path
//! that touches labels goes through them.

use serde::{Deserialize, Serialize};

/// Well-known Gmail system label ids
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const SENT: &str = "SENT";
    pub const TRASH: &str = "TRASH";
    pub const SPAM: &str = "SPAM";
    pub const STARRED: &str = "STARRED";
    pub const IMPORTANT: &str = "IMPORTANT";
    pub const UNREAD: &str = "UNREAD";

    /// Prefix of Gmail's tab-level category labels
    pub const CATEGORY_PREFIX: &str = "CATEGORY_";

    pub const CATEGORY_PROMOTIONS: &str = "CATEGORY_PROMOTIONS";
    pub const CATEGORY_SOCIAL: &str = "CATEGORY_SOCIAL";
    pub const CATEGORY_UPDATES: &str = "CATEGORY_UPDATES";
    pub const CATEGORY_FORUMS: &str = "CATEGORY_FORUMS";
}

/// Derive the category column from a label array
///
/// The first `CATEGORY_*` label wins; a message with no category label but
/// a `SENT` label is categorized as `SENT`; anything else has no category.
pub fn derive_category(label_ids: &[String]) -> Option<String> {
    if let Some(cat) = label_ids
        .iter()
        .find(|l| l.starts_with(labels::CATEGORY_PREFIX))
    {
        return Some(cat.clone());
    }
    if label_ids.iter().any(|l| l == labels::SENT) {
        return Some(labels::SENT.to_string());
    }
    None
}

/// Boolean flag columns derived from a label array
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelFlags {
    pub is_unread: bool,
    pub is_starred: bool,
    pub is_trash: bool,
    pub is_spam: bool,
    pub is_important: bool,
}

/// Derive the flag columns from a label array
pub fn derive_flags(label_ids: &[String]) -> LabelFlags {
    let has = |l: &str| label_ids.iter().any(|x| x == l);
    LabelFlags {
        is_unread: has(labels::UNREAD),
        is_starred: has(labels::STARRED),
        is_trash: has(labels::TRASH),
        is_spam: has(labels::SPAM),
        is_important: has(labels::IMPORTANT),
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Parse an RFC 5322 style address like `John Doe <john@example.com>`
    ///
    /// Handles quoted display names; anything without angle brackets is
    /// treated as a bare address.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }
}

/// An attachment descriptor stored alongside the mirror row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime: String,
    pub size: i64,
}

/// One mirrored message, keyed by (message_id, account_id)
///
/// `message_id` is opaque and immutable for the lifetime of the message at
/// the provider. `internal_date` (ms since epoch) is the authoritative
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    /// Canonical Gmail label ids
    pub labels: Vec<String>,
    /// Derived: first CATEGORY_* label, else SENT, else none
    pub category: Option<String>,
    pub size_bytes: i64,
    /// Attachment count
    pub has_attachments: i64,
    pub attachments: Option<Vec<Attachment>>,
    pub is_unread: bool,
    pub is_starred: bool,
    pub is_trash: bool,
    pub is_spam: bool,
    pub is_important: bool,
    /// Provider-internal receive time, ms since epoch
    pub internal_date: i64,
    /// When this row was last written by a sync, ms since epoch
    pub synced_at: i64,
    /// First URL found in List-Unsubscribe, https preferred over mailto
    pub unsubscribe_link: Option<String>,
}

impl EmailRecord {
    /// Create an empty record for a message id
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: None,
            subject: None,
            snippet: None,
            from_email: None,
            from_name: None,
            labels: Vec::new(),
            category: None,
            size_bytes: 0,
            has_attachments: 0,
            attachments: None,
            is_unread: false,
            is_starred: false,
            is_trash: false,
            is_spam: false,
            is_important: false,
            internal_date: 0,
            synced_at: 0,
            unsubscribe_link: None,
        }
    }

    /// Replace the label array and re-derive category and flags
    pub fn apply_labels(&mut self, label_ids: Vec<String>) {
        self.category = derive_category(&label_ids);
        let flags = derive_flags(&label_ids);
        self.is_unread = flags.is_unread;
        self.is_starred = flags.is_starred;
        self.is_trash = flags.is_trash;
        self.is_spam = flags.is_spam;
        self.is_important = flags.is_important;
        self.labels = label_ids;
    }
}
