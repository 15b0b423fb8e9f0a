//! SQLite-backed metadata store
//!
//! One shared database file holds every table; all rows are keyed by
//! account id. Label arrays are stored as JSON text and queried through
//! the JSON1 `json_each` table-valued function; the five boolean flags and
//! the category column are materialized at write time so the hot filters
//! stay on plain indexed columns.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::{
    AgeStats, BreakdownBy, BreakdownRow, BreakdownSort, CategoryCounts, CleanupStats, CohortStat,
    EmailSort, LabelUpdate, MailboxStats, MetadataStore, Page, QuerySnapshot, SenderAggregate,
    SenderStats, SizeStats, StoreError, StoreResult, StoredToken, SubscriptionSender,
};
use crate::models::{
    Account, EmailFilter, EmailRecord, Job, JobStatus, JobType, SearchExpr, SyncStatus,
    derive_category, derive_flags, labels,
};

const MS_PER_YEAR: i64 = 365 * 24 * 60 * 60 * 1000;
const MB: i64 = 1024 * 1024;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: full schema
        M::up(
            r#"
            CREATE TABLE mail_accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL DEFAULT 'gmail',
                email TEXT NOT NULL,
                sync_status TEXT NOT NULL DEFAULT 'idle',
                sync_started_at INTEGER,
                sync_completed_at INTEGER,
                sync_error TEXT,
                history_id INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, provider, email)
            );

            CREATE TABLE oauth_tokens (
                account_id TEXT PRIMARY KEY
                    REFERENCES mail_accounts(id) ON DELETE CASCADE,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                scope TEXT,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE emails (
                message_id TEXT NOT NULL,
                account_id TEXT NOT NULL
                    REFERENCES mail_accounts(id) ON DELETE CASCADE,
                thread_id TEXT,
                subject TEXT,
                snippet TEXT,
                from_email TEXT,
                from_name TEXT,
                labels TEXT NOT NULL DEFAULT '[]',
                category TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                attachments TEXT,
                is_unread INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                is_trash INTEGER NOT NULL DEFAULT 0,
                is_spam INTEGER NOT NULL DEFAULT 0,
                is_important INTEGER NOT NULL DEFAULT 0,
                internal_date INTEGER,
                synced_at INTEGER,
                unsubscribe_link TEXT,
                PRIMARY KEY (message_id, account_id)
            );

            CREATE INDEX idx_emails_account ON emails(account_id);
            CREATE INDEX idx_emails_from ON emails(account_id, from_email);
            CREATE INDEX idx_emails_category ON emails(account_id, category);
            CREATE INDEX idx_emails_date ON emails(account_id, internal_date);
            CREATE INDEX idx_emails_size ON emails(account_id, size_bytes);
            CREATE INDEX idx_emails_unread ON emails(account_id, is_unread);
            CREATE INDEX idx_emails_starred ON emails(account_id, is_starred);
            CREATE INDEX idx_emails_trash ON emails(account_id, is_trash);
            CREATE INDEX idx_emails_spam ON emails(account_id, is_spam);
            CREATE INDEX idx_emails_important ON emails(account_id, is_important);

            CREATE TABLE senders (
                account_id TEXT NOT NULL
                    REFERENCES mail_accounts(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                name TEXT,
                count INTEGER NOT NULL DEFAULT 0,
                total_size INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (account_id, email)
            );

            CREATE INDEX idx_senders_count ON senders(account_id, count DESC);

            -- Append-only archive; deliberately no FK so it survives
            -- account deletion
            CREATE TABLE deleted_emails (
                message_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                thread_id TEXT,
                subject TEXT,
                snippet TEXT,
                from_email TEXT,
                from_name TEXT,
                labels TEXT NOT NULL DEFAULT '[]',
                category TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                attachments TEXT,
                is_unread INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                is_spam INTEGER NOT NULL DEFAULT 0,
                is_important INTEGER NOT NULL DEFAULT 0,
                internal_date INTEGER,
                unsubscribe_link TEXT,
                deleted_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, account_id)
            );

            CREATE INDEX idx_deleted_account ON deleted_emails(account_id);

            CREATE TABLE unsubscribed_senders (
                account_id TEXT NOT NULL
                    REFERENCES mail_accounts(id) ON DELETE CASCADE,
                sender_email TEXT NOT NULL,
                unsubscribed_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, sender_email)
            );

            CREATE TABLE jobs (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL
                    REFERENCES mail_accounts(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                payload TEXT,
                total_messages INTEGER NOT NULL DEFAULT 0,
                processed_messages INTEGER NOT NULL DEFAULT 0,
                next_page_token TEXT,
                last_error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                resumed_at INTEGER,
                processed_at_resume INTEGER,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER
            );

            CREATE INDEX idx_jobs_account_status ON jobs(account_id, status);
            CREATE INDEX idx_jobs_status ON jobs(status, created_at);

            CREATE TABLE ai_query_cache (
                query_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                filter TEXT NOT NULL,
                match_count INTEGER NOT NULL,
                total_size INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        ),
    ])
}

const EMAIL_COLUMNS: &str = "message_id, thread_id, subject, snippet, from_email, from_name, \
     labels, category, size_bytes, has_attachments, attachments, \
     is_unread, is_starred, is_trash, is_spam, is_important, \
     internal_date, synced_at, unsubscribe_link";

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, email, sync_status, sync_started_at, \
     sync_completed_at, sync_error, history_id, created_at, updated_at";

const JOB_COLUMNS: &str = "id, account_id, user_id, job_type, status, payload, \
     total_messages, processed_messages, next_page_token, last_error, retry_count, \
     resumed_at, processed_at_resume, created_at, started_at, completed_at";

/// SQLite metadata store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    ///
    /// The path's parent directory is created if missing, so the default
    /// data-dir location works on first run.
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> StoreResult<Self> {
        // WAL lets readers proceed during sync writes; NORMAL sync is safe
        // under WAL; foreign_keys is required for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations().to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn email_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmailRecord> {
        let labels_json: String = row.get(6)?;
        let attachments_json: Option<String> = row.get(10)?;
        Ok(EmailRecord {
            message_id: row.get(0)?,
            thread_id: row.get(1)?,
            subject: row.get(2)?,
            snippet: row.get(3)?,
            from_email: row.get(4)?,
            from_name: row.get(5)?,
            labels: serde_json::from_str(&labels_json).unwrap_or_default(),
            category: row.get(7)?,
            size_bytes: row.get(8)?,
            has_attachments: row.get(9)?,
            attachments: attachments_json.and_then(|j| serde_json::from_str(&j).ok()),
            is_unread: row.get(11)?,
            is_starred: row.get(12)?,
            is_trash: row.get(13)?,
            is_spam: row.get(14)?,
            is_important: row.get(15)?,
            internal_date: row.get::<_, Option<i64>>(16)?.unwrap_or(0),
            synced_at: row.get::<_, Option<i64>>(17)?.unwrap_or(0),
            unsubscribe_link: row.get(18)?,
        })
    }

    fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
        let status: String = row.get(4)?;
        Ok(Account {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            email: row.get(3)?,
            sync_status: SyncStatus::parse(&status).unwrap_or(SyncStatus::Idle),
            sync_started_at: row.get(5)?,
            sync_completed_at: row.get(6)?,
            sync_error: row.get(7)?,
            history_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
        let job_type: String = row.get(3)?;
        let status: String = row.get(4)?;
        Ok(Job {
            id: row.get(0)?,
            account_id: row.get(1)?,
            user_id: row.get(2)?,
            job_type: JobType::parse(&job_type).unwrap_or(JobType::Sync),
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Pending),
            payload: row.get(5)?,
            total_messages: row.get(6)?,
            processed_messages: row.get(7)?,
            next_page_token: row.get(8)?,
            last_error: row.get(9)?,
            retry_count: row.get(10)?,
            resumed_at: row.get(11)?,
            processed_at_resume: row.get(12)?,
            created_at: row.get(13)?,
            started_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }

    /// Read-modify-write one row's labels inside a transaction
    ///
    /// Returns false if the row does not exist.
    fn apply_label_delta(
        tx: &Connection,
        account_id: &str,
        message_id: &str,
        added: &[String],
        removed: &[String],
        now: i64,
    ) -> StoreResult<bool> {
        let labels_json: Option<String> = tx
            .query_row(
                "SELECT labels FROM emails WHERE account_id = ? AND message_id = ?",
                params![account_id, message_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(labels_json) = labels_json else {
            return Ok(false);
        };

        let mut label_ids: Vec<String> = serde_json::from_str(&labels_json).unwrap_or_default();
        for label in added {
            if !label_ids.contains(label) {
                label_ids.push(label.clone());
            }
        }
        label_ids.retain(|l| !removed.contains(l));

        let category = derive_category(&label_ids);
        let flags = derive_flags(&label_ids);

        tx.execute(
            "UPDATE emails SET labels = ?, category = ?, is_unread = ?, is_starred = ?, \
             is_trash = ?, is_spam = ?, is_important = ?, synced_at = ? \
             WHERE account_id = ? AND message_id = ?",
            params![
                serde_json::to_string(&label_ids)?,
                category,
                flags.is_unread,
                flags.is_starred,
                flags.is_trash,
                flags.is_spam,
                flags.is_important,
                now,
                account_id,
                message_id,
            ],
        )?;

        Ok(true)
    }

    /// Append filter conditions to a WHERE clause that already scopes by
    /// account. All conditions AND together; the comma-list fields OR their
    /// own entries.
    fn push_filter(filter: &EmailFilter, sql: &mut String, args: &mut Vec<Value>) {
        if let Some(sender) = &filter.sender
            && !sender.trim().is_empty()
        {
            sql.push_str(
                " AND (LOWER(COALESCE(from_email,'')) LIKE ? \
                 OR LOWER(COALESCE(from_name,'')) LIKE ?)",
            );
            let pattern = format!("%{}%", sender.trim().to_lowercase());
            args.push(Value::Text(pattern.clone()));
            args.push(Value::Text(pattern));
        }

        if let Some(list) = &filter.sender_email {
            let entries = EmailFilter::split_list(list);
            if !entries.is_empty() {
                sql.push_str(&format!(
                    " AND LOWER(COALESCE(from_email,'')) IN ({})",
                    placeholders(entries.len())
                ));
                for entry in entries {
                    args.push(Value::Text(entry.to_lowercase()));
                }
            }
        }

        if let Some(list) = &filter.sender_domain {
            let entries = EmailFilter::split_list(list);
            if !entries.is_empty() {
                let clause = vec!["LOWER(COALESCE(from_email,'')) LIKE ?"; entries.len()];
                sql.push_str(&format!(" AND ({})", clause.join(" OR ")));
                for entry in entries {
                    args.push(Value::Text(format!("%@{}", entry.to_lowercase())));
                }
            }
        }

        if let Some(category) = &filter.category {
            sql.push_str(" AND category = ?");
            args.push(Value::Text(category.clone()));
        }

        if let Some(from) = filter.date_from {
            sql.push_str(" AND internal_date >= ?");
            args.push(Value::Integer(from));
        }
        if let Some(to) = filter.date_to {
            sql.push_str(" AND internal_date <= ?");
            args.push(Value::Integer(to));
        }
        if let Some(min) = filter.size_min {
            sql.push_str(" AND size_bytes >= ?");
            args.push(Value::Integer(min));
        }
        if let Some(max) = filter.size_max {
            sql.push_str(" AND size_bytes <= ?");
            args.push(Value::Integer(max));
        }

        for (column, value) in [
            ("is_unread", filter.is_unread),
            ("is_starred", filter.is_starred),
            ("is_trash", filter.is_trash),
            ("is_spam", filter.is_spam),
            ("is_important", filter.is_important),
        ] {
            if let Some(value) = value {
                sql.push_str(&format!(" AND {} = ?", column));
                args.push(Value::Integer(value as i64));
            }
        }

        if let Some(has) = filter.has_attachments {
            if has {
                sql.push_str(" AND has_attachments > 0");
            } else {
                sql.push_str(" AND has_attachments = 0");
            }
        }

        if let Some(sent) = filter.is_sent {
            let exists =
                "EXISTS (SELECT 1 FROM json_each(emails.labels) WHERE json_each.value = 'SENT')";
            if sent {
                sql.push_str(&format!(" AND {}", exists));
            } else {
                sql.push_str(&format!(" AND NOT {}", exists));
            }
        }

        if let Some(archived) = filter.is_archived {
            let clause = "(NOT EXISTS (SELECT 1 FROM json_each(emails.labels) \
                 WHERE json_each.value = 'INBOX') AND is_trash = 0 AND is_spam = 0)";
            if archived {
                sql.push_str(&format!(" AND {}", clause));
            } else {
                sql.push_str(&format!(" AND NOT {}", clause));
            }
        }

        if let Some(list) = &filter.label_ids {
            let entries = EmailFilter::split_list(list);
            if !entries.is_empty() {
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM json_each(emails.labels) \
                     WHERE json_each.value IN ({}))",
                    placeholders(entries.len())
                ));
                for entry in entries {
                    args.push(Value::Text(entry));
                }
            }
        }

        if let Some(search) = &filter.search
            && let Some(expr) = SearchExpr::parse(search)
        {
            let (tokens, joiner) = match &expr {
                SearchExpr::Or(tokens) => (tokens, " OR "),
                SearchExpr::And(tokens) => (tokens, " AND "),
            };
            if !tokens.is_empty() {
                let clause = vec!["LOWER(COALESCE(subject,'')) LIKE ?"; tokens.len()];
                sql.push_str(&format!(" AND ({})", clause.join(joiner)));
                for token in tokens {
                    args.push(Value::Text(format!("%{}%", token.to_lowercase())));
                }
            }
        }
    }

    fn filtered_query(
        account_id: &str,
        filter: &EmailFilter,
        select: &str,
        tail: &str,
    ) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {} FROM emails WHERE account_id = ?", select);
        let mut args = vec![Value::Text(account_id.to_string())];
        Self::push_filter(filter, &mut sql, &mut args);
        sql.push_str(tail);
        (sql, args)
    }
}

impl MetadataStore for SqliteStore {
    fn create_account(&self, account: &Account) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO mail_accounts ({}) VALUES (?,?,?,?,?,?,?,?,?,?,?)",
                ACCOUNT_COLUMNS
            ),
            params![
                account.id,
                account.user_id,
                account.provider,
                account.email,
                account.sync_status.as_str(),
                account.sync_started_at,
                account.sync_completed_at,
                account.sync_error,
                account.history_id,
                account.created_at,
                account.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_account(&self, account_id: &str) -> StoreResult<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                &format!(
                    "SELECT {} FROM mail_accounts WHERE id = ?",
                    ACCOUNT_COLUMNS
                ),
                [account_id],
                Self::account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts ORDER BY created_at ASC",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([], Self::account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn set_sync_status(&self, account_id: &str, status: SyncStatus) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let changed = match status {
            SyncStatus::Syncing | SyncStatus::StatsOnly => conn.execute(
                "UPDATE mail_accounts SET sync_status = ?, \
                 sync_started_at = COALESCE(sync_started_at, ?), updated_at = ? WHERE id = ?",
                params![status.as_str(), now, now, account_id],
            )?,
            SyncStatus::Completed => conn.execute(
                "UPDATE mail_accounts SET sync_status = ?, sync_completed_at = ?, \
                 sync_error = NULL, sync_started_at = NULL, updated_at = ? WHERE id = ?",
                params![status.as_str(), now, now, account_id],
            )?,
            _ => conn.execute(
                "UPDATE mail_accounts SET sync_status = ?, updated_at = ? WHERE id = ?",
                params![status.as_str(), now, account_id],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    fn set_sync_error(&self, account_id: &str, message: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mail_accounts SET sync_status = 'error', sync_error = ?, updated_at = ? \
             WHERE id = ?",
            params![message, now_ms(), account_id],
        )?;
        Ok(())
    }

    fn set_history_id(&self, account_id: &str, history_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        // MAX keeps the cursor monotone even if callers race
        conn.execute(
            "UPDATE mail_accounts SET history_id = MAX(COALESCE(history_id, 0), ?), \
             updated_at = ? WHERE id = ?",
            params![history_id, now_ms(), account_id],
        )?;
        Ok(())
    }

    fn delete_account(&self, account_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM mail_accounts WHERE id = ?", [account_id])?;
        Ok(())
    }

    fn save_token(&self, account_id: &str, token: &StoredToken) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO oauth_tokens (account_id, access_token, refresh_token, scope, expires_at) \
             VALUES (?,?,?,?,?) \
             ON CONFLICT(account_id) DO UPDATE SET \
                access_token = excluded.access_token, \
                refresh_token = excluded.refresh_token, \
                scope = excluded.scope, \
                expires_at = excluded.expires_at",
            params![
                account_id,
                token.access_token,
                token.refresh_token,
                token.scope,
                token.expires_at,
            ],
        )?;
        Ok(())
    }

    fn get_token(&self, account_id: &str) -> StoreResult<Option<StoredToken>> {
        let conn = self.conn.lock().unwrap();
        let token = conn
            .query_row(
                "SELECT access_token, refresh_token, scope, expires_at \
                 FROM oauth_tokens WHERE account_id = ?",
                [account_id],
                |row| {
                    Ok(StoredToken {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        scope: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    fn clear_emails(&self, account_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM emails WHERE account_id = ?", [account_id])?;
        tx.execute("DELETE FROM senders WHERE account_id = ?", [account_id])?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_emails(&self, account_id: &str, records: &[EmailRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO emails (account_id, {}) \
                 VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?) \
                 ON CONFLICT(message_id, account_id) DO UPDATE SET \
                    thread_id = excluded.thread_id, \
                    subject = excluded.subject, \
                    snippet = excluded.snippet, \
                    from_email = excluded.from_email, \
                    from_name = excluded.from_name, \
                    labels = excluded.labels, \
                    category = excluded.category, \
                    size_bytes = excluded.size_bytes, \
                    has_attachments = excluded.has_attachments, \
                    attachments = excluded.attachments, \
                    is_unread = excluded.is_unread, \
                    is_starred = excluded.is_starred, \
                    is_trash = excluded.is_trash, \
                    is_spam = excluded.is_spam, \
                    is_important = excluded.is_important, \
                    internal_date = excluded.internal_date, \
                    synced_at = excluded.synced_at, \
                    unsubscribe_link = excluded.unsubscribe_link",
                EMAIL_COLUMNS
            ))?;

            for record in records {
                let attachments_json = record
                    .attachments
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.execute(params![
                    account_id,
                    record.message_id,
                    record.thread_id,
                    record.subject,
                    record.snippet,
                    record.from_email,
                    record.from_name,
                    serde_json::to_string(&record.labels)?,
                    record.category,
                    record.size_bytes,
                    record.has_attachments,
                    attachments_json,
                    record.is_unread,
                    record.is_starred,
                    record.is_trash,
                    record.is_spam,
                    record.is_important,
                    record.internal_date,
                    record.synced_at,
                    record.unsubscribe_link,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_labels(
        &self,
        account_id: &str,
        message_id: &str,
        added: &[String],
        removed: &[String],
    ) -> StoreResult<LabelUpdate> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let applied = Self::apply_label_delta(&tx, account_id, message_id, added, removed, now_ms())?;
        tx.commit()?;
        Ok(if applied {
            LabelUpdate::Applied
        } else {
            LabelUpdate::NotFound
        })
    }

    fn mark_trashed(&self, account_id: &str, ids: &[String]) -> StoreResult<()> {
        let added = vec![labels::TRASH.to_string()];
        let removed = vec![labels::INBOX.to_string()];
        let now = now_ms();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for id in ids {
            Self::apply_label_delta(&tx, account_id, id, &added, &removed, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_by_ids(&self, account_id: &str, ids: &[String]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for chunk in ids.chunks(500) {
            let mut args = vec![Value::Text(account_id.to_string())];
            args.extend(chunk.iter().map(|id| Value::Text(id.clone())));
            tx.execute(
                &format!(
                    "DELETE FROM emails WHERE account_id = ? AND message_id IN ({})",
                    placeholders(chunk.len())
                ),
                params_from_iter(args),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn archive_and_delete(&self, account_id: &str, ids: &[String]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = now_ms();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for chunk in ids.chunks(500) {
            let mut args = vec![
                Value::Integer(now),
                Value::Text(account_id.to_string()),
            ];
            args.extend(chunk.iter().map(|id| Value::Text(id.clone())));
            // Archive first: a crash between the two statements must never
            // lose metadata, only leave an already-archived row behind.
            tx.execute(
                &format!(
                    "INSERT INTO deleted_emails (message_id, account_id, thread_id, subject, \
                     snippet, from_email, from_name, labels, category, size_bytes, \
                     has_attachments, attachments, is_unread, is_starred, is_spam, \
                     is_important, internal_date, unsubscribe_link, deleted_at) \
                     SELECT message_id, account_id, thread_id, subject, snippet, from_email, \
                     from_name, labels, category, size_bytes, has_attachments, attachments, \
                     is_unread, is_starred, is_spam, is_important, internal_date, \
                     unsubscribe_link, ? \
                     FROM emails WHERE account_id = ? AND message_id IN ({}) \
                     ON CONFLICT(message_id, account_id) DO NOTHING",
                    placeholders(chunk.len())
                ),
                params_from_iter(args.clone()),
            )?;

            tx.execute(
                &format!(
                    "DELETE FROM emails WHERE account_id = ? AND message_id IN ({})",
                    placeholders(chunk.len())
                ),
                params_from_iter(args.into_iter().skip(1)),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn build_sender_aggregates(&self, account_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM senders WHERE account_id = ?", [account_id])?;
        // name = most common non-empty display name for that address
        tx.execute(
            "INSERT INTO senders (account_id, email, name, count, total_size) \
             SELECT e.account_id, e.from_email, \
                    (SELECT e2.from_name FROM emails e2 \
                      WHERE e2.account_id = e.account_id AND e2.from_email = e.from_email \
                        AND e2.from_name IS NOT NULL AND e2.from_name != '' \
                      GROUP BY e2.from_name ORDER BY COUNT(*) DESC LIMIT 1), \
                    COUNT(*), COALESCE(SUM(e.size_bytes), 0) \
             FROM emails e \
             WHERE e.account_id = ? AND e.from_email IS NOT NULL \
             GROUP BY e.from_email",
            [account_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_email(&self, account_id: &str, message_id: &str) -> StoreResult<Option<EmailRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM emails WHERE account_id = ? AND message_id = ?",
                    EMAIL_COLUMNS
                ),
                params![account_id, message_id],
                Self::email_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn query_emails(
        &self,
        account_id: &str,
        filter: &EmailFilter,
        page: Page,
        sort: EmailSort,
    ) -> StoreResult<Vec<EmailRecord>> {
        let order = match sort {
            EmailSort::DateDesc => " ORDER BY internal_date DESC",
            EmailSort::DateAsc => " ORDER BY internal_date ASC",
            EmailSort::SizeDesc => " ORDER BY size_bytes DESC",
            EmailSort::SizeAsc => " ORDER BY size_bytes ASC",
        };
        let (sql, mut args) = Self::filtered_query(
            account_id,
            filter,
            EMAIL_COLUMNS,
            &format!("{} LIMIT ? OFFSET ?", order),
        );
        args.push(Value::Integer(page.limit as i64));
        args.push(Value::Integer(page.offset()));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args), Self::email_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_filtered(&self, account_id: &str, filter: &EmailFilter) -> StoreResult<i64> {
        let (sql, args) = Self::filtered_query(account_id, filter, "COUNT(*)", "");
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(count)
    }

    fn sum_filtered_size(&self, account_id: &str, filter: &EmailFilter) -> StoreResult<i64> {
        let (sql, args) =
            Self::filtered_query(account_id, filter, "COALESCE(SUM(size_bytes), 0)", "");
        let conn = self.conn.lock().unwrap();
        let sum = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(sum)
    }

    fn ids_for_filter(&self, account_id: &str, filter: &EmailFilter) -> StoreResult<Vec<String>> {
        let (sql, args) = Self::filtered_query(
            account_id,
            filter,
            "message_id",
            " ORDER BY internal_date DESC",
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(args), |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn ids_with_size_for_filter(
        &self,
        account_id: &str,
        filter: &EmailFilter,
    ) -> StoreResult<Vec<(String, i64)>> {
        let (sql, args) = Self::filtered_query(
            account_id,
            filter,
            "message_id, size_bytes",
            " ORDER BY internal_date DESC",
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn sender_suggestions(
        &self,
        account_id: &str,
        query: &str,
        limit: u32,
    ) -> StoreResult<Vec<SenderAggregate>> {
        let pattern = format!("%{}%", query.to_lowercase());
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT email, name, count, total_size FROM senders \
             WHERE account_id = ? AND (LOWER(email) LIKE ? OR LOWER(COALESCE(name,'')) LIKE ?) \
             ORDER BY count DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![account_id, pattern, pattern, limit], |row| {
                Ok(SenderAggregate {
                    email: row.get(0)?,
                    name: row.get(1)?,
                    count: row.get(2)?,
                    total_size: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn senders_with_unsubscribe(
        &self,
        account_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<SubscriptionSender>> {
        let conn = self.conn.lock().unwrap();
        // The newest row's link wins for each sender
        let mut stmt = conn.prepare(
            "SELECT e.from_email, \
                    (SELECT e3.from_name FROM emails e3 \
                      WHERE e3.account_id = e.account_id AND e3.from_email = e.from_email \
                        AND e3.from_name IS NOT NULL AND e3.from_name != '' \
                      GROUP BY e3.from_name ORDER BY COUNT(*) DESC LIMIT 1), \
                    COUNT(*), COALESCE(SUM(e.size_bytes), 0), \
                    (SELECT e2.unsubscribe_link FROM emails e2 \
                      WHERE e2.account_id = e.account_id AND e2.from_email = e.from_email \
                        AND e2.unsubscribe_link IS NOT NULL \
                      ORDER BY e2.internal_date DESC LIMIT 1) AS link \
             FROM emails e \
             WHERE e.account_id = ? AND e.is_trash = 0 AND e.is_spam = 0 \
               AND e.from_email IS NOT NULL \
               AND e.from_email NOT IN \
                   (SELECT sender_email FROM unsubscribed_senders WHERE account_id = ?) \
             GROUP BY e.from_email \
             HAVING link IS NOT NULL \
             ORDER BY COUNT(*) DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![account_id, account_id, limit], |row| {
                Ok(SubscriptionSender {
                    email: row.get(0)?,
                    name: row.get(1)?,
                    count: row.get(2)?,
                    total_size: row.get(3)?,
                    unsubscribe_link: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn distinct_categories(&self, account_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM emails \
             WHERE account_id = ? AND category IS NOT NULL ORDER BY category",
        )?;
        let categories = stmt
            .query_map([account_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn calculate_stats(&self, account_id: &str) -> StoreResult<MailboxStats> {
        let now = now_ms();
        let year_ago = now - MS_PER_YEAR;
        let two_years_ago = now - 2 * MS_PER_YEAR;

        // One pass over the account's rows. "inbox" excludes trash and
        // spam; "clean" additionally excludes starred and important.
        let sql = "SELECT \
             SUM(inbox), \
             SUM(inbox AND is_unread), \
             SUM(inbox AND category = 'CATEGORY_PROMOTIONS'), \
             SUM(inbox AND category = 'CATEGORY_SOCIAL'), \
             SUM(inbox AND category = 'CATEGORY_UPDATES'), \
             SUM(inbox AND category = 'CATEGORY_FORUMS'), \
             SUM(inbox AND category IS NULL), \
             SUM(inbox AND size_bytes > ?2), \
             SUM(inbox AND size_bytes > ?3), \
             SUM(CASE WHEN inbox THEN size_bytes ELSE 0 END), \
             SUM(CASE WHEN is_trash THEN size_bytes ELSE 0 END), \
             SUM(inbox AND internal_date < ?4), \
             SUM(inbox AND internal_date < ?5), \
             COUNT(DISTINCT CASE WHEN inbox THEN from_email END), \
             SUM(is_trash), \
             SUM(is_spam), \
             SUM(CASE WHEN is_spam THEN size_bytes ELSE 0 END), \
             SUM(clean AND category = 'CATEGORY_PROMOTIONS'), \
             SUM(CASE WHEN clean AND category = 'CATEGORY_PROMOTIONS' THEN size_bytes ELSE 0 END), \
             SUM(clean AND category = 'CATEGORY_SOCIAL'), \
             SUM(CASE WHEN clean AND category = 'CATEGORY_SOCIAL' THEN size_bytes ELSE 0 END), \
             SUM(clean AND category = 'CATEGORY_UPDATES'), \
             SUM(CASE WHEN clean AND category = 'CATEGORY_UPDATES' THEN size_bytes ELSE 0 END), \
             SUM(clean AND category = 'CATEGORY_FORUMS'), \
             SUM(CASE WHEN clean AND category = 'CATEGORY_FORUMS' THEN size_bytes ELSE 0 END), \
             SUM(clean AND category = 'CATEGORY_PROMOTIONS' AND NOT is_unread), \
             SUM(CASE WHEN clean AND category = 'CATEGORY_PROMOTIONS' AND NOT is_unread \
                 THEN size_bytes ELSE 0 END), \
             SUM(clean AND internal_date < ?4), \
             SUM(CASE WHEN clean AND internal_date < ?4 THEN size_bytes ELSE 0 END), \
             SUM(clean AND internal_date < ?5), \
             SUM(CASE WHEN clean AND internal_date < ?5 THEN size_bytes ELSE 0 END), \
             SUM(clean AND size_bytes > ?2), \
             SUM(CASE WHEN clean AND size_bytes > ?2 THEN size_bytes ELSE 0 END), \
             SUM(clean AND size_bytes > ?3), \
             SUM(CASE WHEN clean AND size_bytes > ?3 THEN size_bytes ELSE 0 END) \
             FROM (SELECT *, (is_trash = 0 AND is_spam = 0) AS inbox, \
                   (is_trash = 0 AND is_spam = 0 AND is_starred = 0 AND is_important = 0) AS clean \
                   FROM emails WHERE account_id = ?1)";

        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            sql,
            params![account_id, 5 * MB, 10 * MB, year_ago, two_years_ago],
            |row| {
                let get = |i: usize| -> rusqlite::Result<i64> {
                    row.get::<_, Option<i64>>(i).map(|v| v.unwrap_or(0))
                };
                Ok(MailboxStats {
                    total: get(0)?,
                    unread: get(1)?,
                    categories: CategoryCounts {
                        promotions: get(2)?,
                        social: get(3)?,
                        updates: get(4)?,
                        forums: get(5)?,
                        primary: get(6)?,
                    },
                    size: SizeStats {
                        larger_5mb: get(7)?,
                        larger_10mb: get(8)?,
                        total_storage_bytes: get(9)?,
                        trash_storage_bytes: get(10)?,
                    },
                    age: AgeStats {
                        older_than_1_year: get(11)?,
                        older_than_2_years: get(12)?,
                    },
                    senders: SenderStats {
                        unique_count: get(13)?,
                    },
                    trash: CohortStat {
                        count: get(14)?,
                        size_bytes: get(10)?,
                    },
                    spam: CohortStat {
                        count: get(15)?,
                        size_bytes: get(16)?,
                    },
                    cleanup: CleanupStats {
                        promotions: CohortStat {
                            count: get(17)?,
                            size_bytes: get(18)?,
                        },
                        social: CohortStat {
                            count: get(19)?,
                            size_bytes: get(20)?,
                        },
                        updates: CohortStat {
                            count: get(21)?,
                            size_bytes: get(22)?,
                        },
                        forums: CohortStat {
                            count: get(23)?,
                            size_bytes: get(24)?,
                        },
                        read_promotions: CohortStat {
                            count: get(25)?,
                            size_bytes: get(26)?,
                        },
                        older_than_1_year: CohortStat {
                            count: get(27)?,
                            size_bytes: get(28)?,
                        },
                        older_than_2_years: CohortStat {
                            count: get(29)?,
                            size_bytes: get(30)?,
                        },
                        larger_than_5mb: CohortStat {
                            count: get(31)?,
                            size_bytes: get(32)?,
                        },
                        larger_than_10mb: CohortStat {
                            count: get(33)?,
                            size_bytes: get(34)?,
                        },
                    },
                })
            },
        )?;
        Ok(stats)
    }

    fn analysis(
        &self,
        account_id: &str,
        filter: &EmailFilter,
        breakdown: BreakdownBy,
        sort: BreakdownSort,
        limit: u32,
    ) -> StoreResult<Vec<BreakdownRow>> {
        let (key_expr, label_expr) = match breakdown {
            BreakdownBy::Sender => (
                "COALESCE(from_email, '')",
                "COALESCE(MAX(from_name), from_email, '')",
            ),
            BreakdownBy::Category => ("COALESCE(category, '')", "COALESCE(category, '')"),
            BreakdownBy::Month => (
                "COALESCE(strftime('%Y-%m', internal_date / 1000, 'unixepoch'), '')",
                "COALESCE(strftime('%Y-%m', internal_date / 1000, 'unixepoch'), '')",
            ),
        };
        let order = match sort {
            BreakdownSort::CountDesc => "cnt DESC",
            BreakdownSort::CountAsc => "cnt ASC",
            BreakdownSort::SizeDesc => "sz DESC",
            BreakdownSort::SizeAsc => "sz ASC",
        };

        let select = format!(
            "{} AS grp, {} AS lbl, COUNT(*) AS cnt, COALESCE(SUM(size_bytes), 0) AS sz",
            key_expr, label_expr
        );
        let tail = format!(" GROUP BY grp ORDER BY {} LIMIT ?", order);
        let (sql, mut args) = Self::filtered_query(account_id, filter, &select, &tail);
        args.push(Value::Integer(limit.min(20) as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(BreakdownRow {
                    key: row.get(0)?,
                    label: row.get(1)?,
                    count: row.get(2)?,
                    total_size: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn deleted_email_ids(&self, account_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT message_id FROM deleted_emails WHERE account_id = ?")?;
        let ids = stmt
            .query_map([account_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn record_unsubscribed(&self, account_id: &str, sender_email: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO unsubscribed_senders (account_id, sender_email, unsubscribed_at) \
             VALUES (?,?,?) ON CONFLICT(account_id, sender_email) DO NOTHING",
            params![account_id, sender_email, now_ms()],
        )?;
        Ok(())
    }

    fn list_unsubscribed(&self, account_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT sender_email FROM unsubscribed_senders \
             WHERE account_id = ? ORDER BY unsubscribed_at DESC",
        )?;
        let senders = stmt
            .query_map([account_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(senders)
    }

    fn insert_job(&self, job: &Job) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.account_id,
                job.user_id,
                job.job_type.as_str(),
                job.status.as_str(),
                job.payload,
                job.total_messages,
                job.processed_messages,
                job.next_page_token,
                job.last_error,
                job.retry_count,
                job.resumed_at,
                job.processed_at_resume,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
                [job_id],
                Self::job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn transition_job(
        &self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> StoreResult<bool> {
        // Terminal states never transition
        let from: Vec<JobStatus> = from.iter().copied().filter(|s| !s.is_terminal()).collect();
        if from.is_empty() {
            return Ok(false);
        }
        let from = from.as_slice();
        let now = now_ms();
        let mut sql = String::from("UPDATE jobs SET status = ?");
        if to == JobStatus::Running {
            sql.push_str(", started_at = COALESCE(started_at, ?)");
        } else if to.is_settled() {
            sql.push_str(", completed_at = ?");
        }
        sql.push_str(&format!(
            " WHERE id = ? AND status IN ({})",
            placeholders(from.len())
        ));

        let mut args = vec![Value::Text(to.as_str().to_string())];
        if to == JobStatus::Running || to.is_settled() {
            args.push(Value::Integer(now));
        }
        args.push(Value::Text(job_id.to_string()));
        args.extend(from.iter().map(|s| Value::Text(s.as_str().to_string())));

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(&sql, params_from_iter(args))?;
        Ok(changed == 1)
    }

    fn update_job_progress(
        &self,
        job_id: &str,
        processed: i64,
        total: Option<i64>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        match total {
            Some(total) => conn.execute(
                "UPDATE jobs SET processed_messages = ?, total_messages = ? WHERE id = ?",
                params![processed, total, job_id],
            )?,
            None => conn.execute(
                "UPDATE jobs SET processed_messages = ? WHERE id = ?",
                params![processed, job_id],
            )?,
        };
        Ok(())
    }

    fn set_job_page_token(&self, job_id: &str, token: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET next_page_token = ? WHERE id = ?",
            params![token, job_id],
        )?;
        Ok(())
    }

    fn mark_job_resumed(&self, job_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET resumed_at = ?, processed_at_resume = processed_messages \
             WHERE id = ?",
            params![now_ms(), job_id],
        )?;
        Ok(())
    }

    fn record_job_error(&self, job_id: &str, message: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET last_error = ?, retry_count = retry_count + 1 WHERE id = ?",
            params![message, job_id],
        )?;
        Ok(())
    }

    fn jobs_in_status(&self, statuses: &[JobStatus]) -> StoreResult<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM jobs WHERE status IN ({}) ORDER BY created_at ASC",
            JOB_COLUMNS,
            placeholders(statuses.len())
        );
        let args: Vec<Value> = statuses
            .iter()
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params_from_iter(args), Self::job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn jobs_for_account(&self, account_id: &str) -> StoreResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE account_id = ? ORDER BY created_at DESC",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([account_id], Self::job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn has_active_job(&self, account_id: &str, job_type: JobType) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE account_id = ? AND job_type = ? \
             AND status IN ('pending', 'running', 'paused')",
            params![account_id, job_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn save_query_snapshot(&self, snapshot: &QuerySnapshot) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ai_query_cache \
             (query_id, account_id, filter, match_count, total_size, created_at) \
             VALUES (?,?,?,?,?,?)",
            params![
                snapshot.query_id,
                snapshot.account_id,
                serde_json::to_string(&snapshot.filter)?,
                snapshot.match_count,
                snapshot.total_size,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_query_snapshot(&self, query_id: &str) -> StoreResult<Option<QuerySnapshot>> {
        let conn = self.conn.lock().unwrap();
        let snapshot = conn
            .query_row(
                "SELECT query_id, account_id, filter, match_count, total_size, created_at \
                 FROM ai_query_cache WHERE query_id = ?",
                [query_id],
                |row| {
                    let filter_json: String = row.get(2)?;
                    Ok(QuerySnapshot {
                        query_id: row.get(0)?,
                        account_id: row.get(1)?,
                        filter: serde_json::from_str(&filter_json).unwrap_or_default(),
                        match_count: row.get(3)?,
                        total_size: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BulkPayload;

    fn test_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut account = Account::new("u1", "user@example.com");
        account.id = "acct1".to_string();
        store.create_account(&account).unwrap();
        store
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("data").join("mirror.sqlite");
        assert!(!db_path.parent().unwrap().exists());

        let store = SqliteStore::open(&db_path).unwrap();
        assert!(db_path.exists());

        let account = Account::new("u1", "user@example.com");
        store.create_account(&account).unwrap();
        assert!(store.get_account(&account.id).unwrap().is_some());
    }

    fn make_email(id: &str, label_ids: &[&str]) -> EmailRecord {
        let mut record = EmailRecord::new(id);
        record.apply_labels(label_ids.iter().map(|s| s.to_string()).collect());
        record.subject = Some(format!("Subject {}", id));
        record.from_email = Some("sender@example.com".to_string());
        record.from_name = Some("Sender".to_string());
        record.size_bytes = 1024;
        record.internal_date = 1_700_000_000_000;
        record.synced_at = 1_700_000_000_000;
        record
    }

    #[test]
    fn test_upsert_derives_flags_and_category() {
        let store = test_store();
        let mut record = make_email("m1", &["INBOX", "UNREAD", "CATEGORY_PROMOTIONS"]);
        record.size_bytes = 2048;
        store.upsert_emails("acct1", &[record]).unwrap();

        let row = store.get_email("acct1", "m1").unwrap().unwrap();
        assert!(row.is_unread);
        assert!(!row.is_starred);
        assert_eq!(row.category.as_deref(), Some("CATEGORY_PROMOTIONS"));
        assert_eq!(row.size_bytes, 2048);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = test_store();
        let records = vec![make_email("m1", &["INBOX"]), make_email("m2", &["SENT"])];
        store.upsert_emails("acct1", &records).unwrap();
        store.upsert_emails("acct1", &records).unwrap();
        store.upsert_emails("acct1", &records).unwrap();

        assert_eq!(
            store.count_filtered("acct1", &EmailFilter::any()).unwrap(),
            2
        );
        let row = store.get_email("acct1", "m2").unwrap().unwrap();
        assert_eq!(row.category.as_deref(), Some("SENT"));
    }

    #[test]
    fn test_upsert_conflict_replaces_row() {
        let store = test_store();
        store
            .upsert_emails("acct1", &[make_email("m1", &["INBOX", "UNREAD"])])
            .unwrap();

        let mut updated = make_email("m1", &["INBOX"]);
        updated.subject = Some("Rewritten".to_string());
        store.upsert_emails("acct1", &[updated]).unwrap();

        let row = store.get_email("acct1", "m1").unwrap().unwrap();
        assert_eq!(row.subject.as_deref(), Some("Rewritten"));
        assert!(!row.is_unread);
        assert_eq!(
            store.count_filtered("acct1", &EmailFilter::any()).unwrap(),
            1
        );
    }

    #[test]
    fn test_update_labels_applies_delta_and_rederives() {
        let store = test_store();
        store
            .upsert_emails("acct1", &[make_email("m1", &["INBOX", "UNREAD"])])
            .unwrap();

        let outcome = store
            .update_labels(
                "acct1",
                "m1",
                &["STARRED".to_string(), "INBOX".to_string()],
                &["UNREAD".to_string()],
            )
            .unwrap();
        assert_eq!(outcome, LabelUpdate::Applied);

        let row = store.get_email("acct1", "m1").unwrap().unwrap();
        assert_eq!(row.labels, vec!["INBOX".to_string(), "STARRED".to_string()]);
        assert!(row.is_starred);
        assert!(!row.is_unread);
    }

    #[test]
    fn test_update_labels_missing_row_reports_not_found() {
        let store = test_store();
        let outcome = store
            .update_labels("acct1", "ghost", &["TRASH".to_string()], &[])
            .unwrap();
        assert_eq!(outcome, LabelUpdate::NotFound);
    }

    #[test]
    fn test_mark_trashed_sets_flag_and_labels() {
        let store = test_store();
        store
            .upsert_emails(
                "acct1",
                &[make_email("m1", &["INBOX", "UNREAD"]), make_email("m2", &["INBOX"])],
            )
            .unwrap();

        store
            .mark_trashed("acct1", &["m1".to_string(), "m2".to_string()])
            .unwrap();

        for id in ["m1", "m2"] {
            let row = store.get_email("acct1", id).unwrap().unwrap();
            assert!(row.is_trash);
            assert!(row.labels.contains(&"TRASH".to_string()));
            assert!(!row.labels.contains(&"INBOX".to_string()));
        }
    }

    #[test]
    fn test_archive_and_delete_moves_rows() {
        let store = test_store();
        store
            .upsert_emails(
                "acct1",
                &[
                    make_email("m1", &["INBOX"]),
                    make_email("m2", &["INBOX"]),
                    make_email("m3", &["INBOX"]),
                ],
            )
            .unwrap();

        let ids = vec!["m1".to_string(), "m2".to_string()];
        store.archive_and_delete("acct1", &ids).unwrap();

        // Every archived id is in exactly one table
        assert!(store.get_email("acct1", "m1").unwrap().is_none());
        assert!(store.get_email("acct1", "m2").unwrap().is_none());
        assert!(store.get_email("acct1", "m3").unwrap().is_some());
        let mut archived = store.deleted_email_ids("acct1").unwrap();
        archived.sort();
        assert_eq!(archived, ids);

        // Re-archival of the same ids is a no-op
        store.archive_and_delete("acct1", &ids).unwrap();
        assert_eq!(store.deleted_email_ids("acct1").unwrap().len(), 2);
    }

    #[test]
    fn test_archive_survives_account_deletion() {
        let store = test_store();
        store
            .upsert_emails("acct1", &[make_email("m1", &["INBOX"])])
            .unwrap();
        store
            .archive_and_delete("acct1", &["m1".to_string()])
            .unwrap();

        store.delete_account("acct1").unwrap();
        assert!(store.get_account("acct1").unwrap().is_none());
        assert_eq!(
            store.deleted_email_ids("acct1").unwrap(),
            vec!["m1".to_string()]
        );
    }

    #[test]
    fn test_history_id_never_decreases() {
        let store = test_store();
        store.set_history_id("acct1", 100).unwrap();
        store.set_history_id("acct1", 250).unwrap();
        store.set_history_id("acct1", 90).unwrap();

        let account = store.get_account("acct1").unwrap().unwrap();
        assert_eq!(account.history_id, Some(250));
    }

    #[test]
    fn test_clear_emails_wipes_mirror_and_senders() {
        let store = test_store();
        store
            .upsert_emails("acct1", &[make_email("m1", &["INBOX"])])
            .unwrap();
        store.build_sender_aggregates("acct1").unwrap();

        store.clear_emails("acct1").unwrap();
        assert_eq!(
            store.count_filtered("acct1", &EmailFilter::any()).unwrap(),
            0
        );
        assert!(store.sender_suggestions("acct1", "", 10).unwrap().is_empty());
    }

    #[test]
    fn test_sender_aggregates_use_most_common_name() {
        let store = test_store();
        let mut records = Vec::new();
        for (i, name) in ["News", "Newsletter", "Newsletter"].iter().enumerate() {
            let mut r = make_email(&format!("m{}", i), &["INBOX"]);
            r.from_email = Some("news@example.com".to_string());
            r.from_name = Some(name.to_string());
            r.size_bytes = 100;
            records.push(r);
        }
        store.upsert_emails("acct1", &records).unwrap();
        store.build_sender_aggregates("acct1").unwrap();

        let senders = store.sender_suggestions("acct1", "news", 10).unwrap();
        assert_eq!(senders.len(), 1);
        assert_eq!(senders[0].name.as_deref(), Some("Newsletter"));
        assert_eq!(senders[0].count, 3);
        assert_eq!(senders[0].total_size, 300);
    }

    #[test]
    fn test_filter_sender_substring_and_lists() {
        let store = test_store();
        let mut a = make_email("m1", &["INBOX"]);
        a.from_email = Some("Alice@Shop.example".to_string());
        a.from_name = Some("Alice Store".to_string());
        let mut b = make_email("m2", &["INBOX"]);
        b.from_email = Some("bob@other.example".to_string());
        b.from_name = Some("Bob".to_string());
        store.upsert_emails("acct1", &[a, b]).unwrap();

        let by_substring = EmailFilter {
            sender: Some("alice".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &by_substring).unwrap(), 1);

        let by_email = EmailFilter {
            sender_email: Some("ALICE@shop.example, nobody@x".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &by_email).unwrap(), 1);

        let by_domain = EmailFilter {
            sender_domain: Some("shop.example,other.example".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &by_domain).unwrap(), 2);
    }

    #[test]
    fn test_filter_bounds_and_tristate() {
        let store = test_store();
        let mut small = make_email("m1", &["INBOX", "UNREAD"]);
        small.size_bytes = 100;
        small.internal_date = 1_000;
        let mut big = make_email("m2", &["INBOX"]);
        big.size_bytes = 10_000;
        big.internal_date = 2_000;
        store.upsert_emails("acct1", &[small, big]).unwrap();

        let min_size = EmailFilter {
            size_min: Some(10_000),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &min_size).unwrap(), 1);

        let date_window = EmailFilter {
            date_from: Some(1_000),
            date_to: Some(1_000),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &date_window).unwrap(), 1);

        // Tri-state: absent matches both, false matches only read rows
        let unread_absent = EmailFilter::any();
        let unread_false = EmailFilter {
            is_unread: Some(false),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &unread_absent).unwrap(), 2);
        assert_eq!(store.count_filtered("acct1", &unread_false).unwrap(), 1);
    }

    #[test]
    fn test_filter_labels_sent_archived() {
        let store = test_store();
        store
            .upsert_emails(
                "acct1",
                &[
                    make_email("inbox", &["INBOX"]),
                    make_email("sent", &["SENT"]),
                    make_email("archived", &["CATEGORY_UPDATES"]),
                    make_email("trashed", &["TRASH"]),
                ],
            )
            .unwrap();

        let with_label = EmailFilter {
            label_ids: Some("SENT,TRASH".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_filtered("acct1", &with_label).unwrap(), 2);

        let sent = EmailFilter {
            is_sent: Some(true),
            ..Default::default()
        };
        assert_eq!(
            store.ids_for_filter("acct1", &sent).unwrap(),
            vec!["sent".to_string()]
        );

        let archived = EmailFilter {
            is_archived: Some(true),
            ..Default::default()
        };
        let archived_ids = store.ids_for_filter("acct1", &archived).unwrap();
        assert!(archived_ids.contains(&"archived".to_string()));
        assert!(archived_ids.contains(&"sent".to_string()));
        assert!(!archived_ids.contains(&"trashed".to_string()));
        assert!(!archived_ids.contains(&"inbox".to_string()));
    }

    #[test]
    fn test_search_or_superset_and_subset() {
        let store = test_store();
        let subjects = [
            ("m1", "Your OTP is 123"),
            ("m2", "Order shipped"),
            ("m3", "verification required"),
            ("m4", "Re: invoice"),
        ];
        let records: Vec<EmailRecord> = subjects
            .iter()
            .map(|(id, subject)| {
                let mut r = make_email(id, &["INBOX"]);
                r.subject = Some(subject.to_string());
                r
            })
            .collect();
        store.upsert_emails("acct1", &records).unwrap();

        let search = |q: &str| EmailFilter {
            search: Some(q.to_string()),
            ..Default::default()
        };

        let mut or_ids = store
            .ids_for_filter("acct1", &search("verification OR otp"))
            .unwrap();
        or_ids.sort();
        assert_eq!(or_ids, vec!["m1".to_string(), "m3".to_string()]);

        // OR is a superset of each term, AND is a subset
        let single = store.count_filtered("acct1", &search("otp")).unwrap();
        let or_count = store
            .count_filtered("acct1", &search("otp OR order"))
            .unwrap();
        let and_count = store
            .count_filtered("acct1", &search("otp AND order"))
            .unwrap();
        assert!(or_count >= single);
        assert!(and_count <= single);
        assert_eq!(and_count, 0);
    }

    #[test]
    fn test_stats_cohorts() {
        let store = test_store();
        let mut rows = vec![
            make_email("inbox_unread", &["INBOX", "UNREAD"]),
            make_email("promo_read", &["INBOX", "CATEGORY_PROMOTIONS"]),
            make_email("promo_starred", &["INBOX", "STARRED", "CATEGORY_PROMOTIONS"]),
            make_email("trashed", &["TRASH"]),
            make_email("spammy", &["SPAM"]),
        ];
        for r in &mut rows {
            r.size_bytes = 1000;
        }
        store.upsert_emails("acct1", &rows).unwrap();

        let stats = store.calculate_stats("acct1").unwrap();
        // total excludes trash and spam
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 1);
        assert_eq!(stats.categories.promotions, 2);
        assert_eq!(stats.categories.primary, 1);
        assert_eq!(stats.trash.count, 1);
        assert_eq!(stats.trash.size_bytes, 1000);
        assert_eq!(stats.spam.count, 1);
        // cleanup additionally excludes starred/important
        assert_eq!(stats.cleanup.promotions.count, 1);
        assert_eq!(stats.cleanup.read_promotions.count, 1);
        assert!(stats.cleanup.promotions.count <= stats.categories.promotions);
        assert_eq!(stats.size.total_storage_bytes, 3000);
        assert_eq!(stats.size.trash_storage_bytes, 1000);
    }

    #[test]
    fn test_stats_age_and_size_buckets() {
        let store = test_store();
        let now = Utc::now().timestamp_millis();
        let mut old = make_email("old", &["INBOX"]);
        old.internal_date = now - 3 * MS_PER_YEAR;
        let mut recent = make_email("recent", &["INBOX"]);
        recent.internal_date = now;
        let mut huge = make_email("huge", &["INBOX"]);
        huge.internal_date = now;
        huge.size_bytes = 11 * MB;
        store.upsert_emails("acct1", &[old, recent, huge]).unwrap();

        let stats = store.calculate_stats("acct1").unwrap();
        assert_eq!(stats.age.older_than_1_year, 1);
        assert_eq!(stats.age.older_than_2_years, 1);
        assert_eq!(stats.size.larger_5mb, 1);
        assert_eq!(stats.size.larger_10mb, 1);
        assert_eq!(stats.cleanup.larger_than_10mb.count, 1);
        assert_eq!(stats.cleanup.larger_than_10mb.size_bytes, 11 * MB);
    }

    #[test]
    fn test_analysis_breakdowns() {
        let store = test_store();
        let mut rows = Vec::new();
        for i in 0..3 {
            let mut r = make_email(&format!("a{}", i), &["INBOX"]);
            r.from_email = Some("bulk@example.com".to_string());
            r.from_name = Some("Bulk".to_string());
            r.size_bytes = 10;
            rows.push(r);
        }
        let mut other = make_email("b0", &["INBOX"]);
        other.from_email = Some("rare@example.com".to_string());
        other.size_bytes = 500;
        rows.push(other);
        store.upsert_emails("acct1", &rows).unwrap();

        let by_sender = store
            .analysis(
                "acct1",
                &EmailFilter::any(),
                BreakdownBy::Sender,
                BreakdownSort::CountDesc,
                20,
            )
            .unwrap();
        assert_eq!(by_sender[0].key, "bulk@example.com");
        assert_eq!(by_sender[0].label, "Bulk");
        assert_eq!(by_sender[0].count, 3);

        let by_size = store
            .analysis(
                "acct1",
                &EmailFilter::any(),
                BreakdownBy::Sender,
                BreakdownSort::SizeDesc,
                1,
            )
            .unwrap();
        assert_eq!(by_size.len(), 1);
        assert_eq!(by_size[0].key, "rare@example.com");

        let by_month = store
            .analysis(
                "acct1",
                &EmailFilter::any(),
                BreakdownBy::Month,
                BreakdownSort::CountDesc,
                20,
            )
            .unwrap();
        assert_eq!(by_month[0].key, "2023-11");
        assert_eq!(by_month[0].count, 4);
    }

    #[test]
    fn test_query_emails_pagination_and_sort() {
        let store = test_store();
        let mut rows = Vec::new();
        for i in 0..5 {
            let mut r = make_email(&format!("m{}", i), &["INBOX"]);
            r.internal_date = 1_000 + i;
            r.size_bytes = 100 - i;
            rows.push(r);
        }
        store.upsert_emails("acct1", &rows).unwrap();

        let newest = store
            .query_emails(
                "acct1",
                &EmailFilter::any(),
                Page { page: 1, limit: 2 },
                EmailSort::DateDesc,
            )
            .unwrap();
        assert_eq!(newest[0].message_id, "m4");
        assert_eq!(newest[1].message_id, "m3");

        let second_page = store
            .query_emails(
                "acct1",
                &EmailFilter::any(),
                Page { page: 2, limit: 2 },
                EmailSort::DateDesc,
            )
            .unwrap();
        assert_eq!(second_page[0].message_id, "m2");

        let by_size = store
            .query_emails(
                "acct1",
                &EmailFilter::any(),
                Page { page: 1, limit: 1 },
                EmailSort::SizeDesc,
            )
            .unwrap();
        assert_eq!(by_size[0].message_id, "m0");
    }

    #[test]
    fn test_job_lifecycle_and_cas() {
        let store = test_store();
        let job = Job::new("acct1", "u1", JobType::Sync, None);
        store.insert_job(&job).unwrap();

        assert!(store
            .transition_job(&job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap());
        // Second promotion loses the race
        assert!(!store
            .transition_job(&job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap());

        store.update_job_progress(&job.id, 42, Some(100)).unwrap();
        store.set_job_page_token(&job.id, Some("pt_42")).unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.processed_messages, 42);
        assert_eq!(loaded.total_messages, 100);
        assert_eq!(loaded.next_page_token.as_deref(), Some("pt_42"));
        assert!(loaded.started_at.is_some());

        assert!(store
            .transition_job(&job.id, &[JobStatus::Running], JobStatus::Completed)
            .unwrap());
        // Terminal states never transition
        assert!(!store
            .transition_job(&job.id, &[JobStatus::Completed], JobStatus::Running)
            .unwrap());
        assert!(!store
            .transition_job(&job.id, &[JobStatus::Running], JobStatus::Running)
            .unwrap());
        let done = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_job_resume_snapshot() {
        let store = test_store();
        let job = Job::new("acct1", "u1", JobType::Sync, None);
        store.insert_job(&job).unwrap();
        store.update_job_progress(&job.id, 1500, Some(10_000)).unwrap();
        store.mark_job_resumed(&job.id).unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.processed_at_resume, Some(1500));
        assert!(loaded.resumed_at.is_some());
    }

    #[test]
    fn test_jobs_in_status_and_active_check() {
        let store = test_store();
        let sync = Job::new("acct1", "u1", JobType::Sync, None);
        let trash = Job::new("acct1", "u1", JobType::Trash, Some(BulkPayload::default()));
        store.insert_job(&sync).unwrap();
        store.insert_job(&trash).unwrap();

        let pending = store.jobs_in_status(&[JobStatus::Pending]).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, sync.id);

        assert!(store.has_active_job("acct1", JobType::Sync).unwrap());
        store
            .transition_job(&sync.id, &[JobStatus::Pending], JobStatus::Cancelled)
            .unwrap();
        assert!(!store.has_active_job("acct1", JobType::Sync).unwrap());
    }

    #[test]
    fn test_token_round_trip() {
        let store = test_store();
        let token = StoredToken {
            access_token: "sealed-access".to_string(),
            refresh_token: "sealed-refresh".to_string(),
            scope: Some("gmail.modify".to_string()),
            expires_at: 1_700_000_000_000,
        };
        store.save_token("acct1", &token).unwrap();
        assert_eq!(store.get_token("acct1").unwrap(), Some(token.clone()));

        let rotated = StoredToken {
            access_token: "sealed-access-2".to_string(),
            expires_at: 1_700_000_999_000,
            ..token
        };
        store.save_token("acct1", &rotated).unwrap();
        assert_eq!(store.get_token("acct1").unwrap(), Some(rotated));
    }

    #[test]
    fn test_query_snapshot_round_trip() {
        let store = test_store();
        let snapshot = QuerySnapshot {
            query_id: "q_1".to_string(),
            account_id: "acct1".to_string(),
            filter: EmailFilter {
                sender_email: Some("x@y.z".to_string()),
                ..Default::default()
            },
            match_count: 3,
            total_size: 4096,
            created_at: 1_700_000_000_000,
        };
        store.save_query_snapshot(&snapshot).unwrap();
        assert_eq!(store.get_query_snapshot("q_1").unwrap(), Some(snapshot));
        assert_eq!(store.get_query_snapshot("missing").unwrap(), None);
    }

    #[test]
    fn test_unsubscribed_senders_hidden_from_subscriptions() {
        let store = test_store();
        let mut a = make_email("m1", &["INBOX"]);
        a.from_email = Some("list@news.example".to_string());
        a.unsubscribe_link = Some("https://news.example/unsub".to_string());
        let mut b = make_email("m2", &["INBOX"]);
        b.from_email = Some("other@news.example".to_string());
        b.unsubscribe_link = Some("https://news.example/unsub2".to_string());
        store.upsert_emails("acct1", &[a, b]).unwrap();

        assert_eq!(store.senders_with_unsubscribe("acct1", 10).unwrap().len(), 2);

        store
            .record_unsubscribed("acct1", "list@news.example")
            .unwrap();
        store
            .record_unsubscribed("acct1", "list@news.example")
            .unwrap();

        let visible = store.senders_with_unsubscribe("acct1", 10).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].email, "other@news.example");
        assert_eq!(
            store.list_unsubscribed("acct1").unwrap(),
            vec!["list@news.example".to_string()]
        );
    }

    #[test]
    fn test_distinct_categories() {
        let store = test_store();
        store
            .upsert_emails(
                "acct1",
                &[
                    make_email("m1", &["INBOX", "CATEGORY_PROMOTIONS"]),
                    make_email("m2", &["INBOX", "CATEGORY_PROMOTIONS"]),
                    make_email("m3", &["SENT"]),
                    make_email("m4", &["INBOX"]),
                ],
            )
            .unwrap();
        assert_eq!(
            store.distinct_categories("acct1").unwrap(),
            vec!["CATEGORY_PROMOTIONS".to_string(), "SENT".to_string()]
        );
    }
}
