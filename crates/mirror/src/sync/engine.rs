//! Full and delta sync implementations
//!
//! The full sync is a state machine over the account's sync_status:
//! `stats_only` captures the delta cursor and a size estimate, `syncing`
//! walks the id listing page by page, and every chunk persists before the
//! next begins so a crash leaves a prefix-consistent mirror. The delta
//! sync replays the provider change log from the stored cursor and
//! escalates to a full resync when the cursor has expired.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use super::{SyncError, SyncMode, SyncOutcome};
use crate::config::MirrorConfig;
use crate::gmail::{BATCH_FAILED, GmailError, MailApi, TokenManager, normalize_metadata};
use crate::jobs::CancelToken;
use crate::models::{Account, EmailRecord, Job, SyncStatus};
use crate::storage::{LabelUpdate, MetadataStore};
use crate::throttle::AdaptiveThrottle;

/// Give up on a chunk after this many consecutive zero-progress attempts
const MAX_STALLED_ATTEMPTS: u32 = 5;

struct FetchStats {
    fetched: usize,
    upserted: usize,
    tombstoned: usize,
    skipped: usize,
    cancelled: bool,
}

/// Drives reconciliation for one account at a time
pub struct SyncEngine {
    store: Arc<dyn MetadataStore>,
    api: Arc<dyn MailApi>,
    tokens: Arc<TokenManager>,
    config: MirrorConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        api: Arc<dyn MailApi>,
        tokens: Arc<TokenManager>,
        config: MirrorConfig,
    ) -> Self {
        Self {
            store,
            api,
            tokens,
            config,
        }
    }

    /// Run one sync job to completion, cancellation, or error
    ///
    /// Picks delta when the account has a completed baseline and the job
    /// carries no resume cursor; anything else is (or resumes) a full sync.
    /// A permanent auth failure marks the account before returning.
    pub fn run_sync_job(
        &self,
        job: &Job,
        throttle: &AdaptiveThrottle,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, SyncError> {
        let account = self
            .store
            .get_account(&job.account_id)?
            .ok_or_else(|| SyncError::Store(crate::storage::StoreError::AccountNotFound(
                job.account_id.clone(),
            )))?;

        let use_delta = account.sync_status == SyncStatus::Completed
            && account.history_id.is_some()
            && job.next_page_token.is_none();

        let result = if use_delta {
            self.delta_sync(&account, job, throttle, cancel)
        } else {
            self.full_sync(&account, job, throttle, cancel, false)
        };

        match result {
            Err(SyncError::Auth) => {
                warn!("account {} lost authorization", account.id);
                self.store
                    .set_sync_status(&account.id, SyncStatus::AuthExpired)?;
                Err(SyncError::Auth)
            }
            Err(e) => {
                self.store
                    .set_sync_error(&account.id, &sanitized_error(&e))?;
                Err(e)
            }
            Ok(outcome) => Ok(outcome),
        }
    }

    /// Full list-and-fetch sync
    fn full_sync(
        &self,
        account: &Account,
        job: &Job,
        throttle: &AdaptiveThrottle,
        cancel: &CancelToken,
        wipe_first: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let mut outcome = SyncOutcome::new(SyncMode::Full);
        let mut processed = job.processed_messages;
        let resuming = job.next_page_token.is_some();

        if wipe_first {
            self.store.clear_emails(&account.id)?;
            processed = 0;
            self.store.update_job_progress(&job.id, 0, None)?;
        }

        if !resuming {
            // Capture the cursor and an estimate before any fetching, so
            // the post-sync delta covers everything that arrives meanwhile
            self.store
                .set_sync_status(&account.id, SyncStatus::StatsOnly)?;

            let profile = self
                .tokens
                .with_token(&account.id, |t| self.api.get_profile(t))
                .map_err(SyncError::from_gmail)?;
            if let Ok(history_id) = profile.history_id.parse::<i64>() {
                self.store.set_history_id(&account.id, history_id)?;
            }

            let probe = self
                .tokens
                .with_token(&account.id, |t| self.api.list_messages(t, 1, None))
                .map_err(SyncError::from_gmail)?;
            let estimate = probe.result_size_estimate.unwrap_or(0) as i64;
            self.store
                .update_job_progress(&job.id, processed, Some(estimate))?;
            info!(
                "starting full sync for account {} (~{} messages)",
                account.id, estimate
            );
        } else {
            info!(
                "resuming full sync for account {} at {} processed",
                account.id, processed
            );
        }

        self.store
            .set_sync_status(&account.id, SyncStatus::Syncing)?;

        let mut page_token = job.next_page_token.clone();
        loop {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            let listing = self
                .tokens
                .with_token(&account.id, |t| {
                    self.api
                        .list_messages(t, self.config.page_size, page_token.as_deref())
                })
                .map_err(SyncError::from_gmail)?;

            let ids: Vec<String> = listing
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.id)
                .collect();

            if !ids.is_empty() {
                let stats =
                    self.fetch_chunks(&account.id, &job.id, ids, throttle, cancel, &mut processed)?;
                outcome.fetched += stats.fetched;
                outcome.upserted += stats.upserted;
                outcome.deleted += stats.tombstoned;
                outcome.skipped += stats.skipped;
                if stats.cancelled {
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
            }

            // Persist the cursor only after the page's chunks are all in,
            // so a crash replays at most one page of idempotent upserts
            self.store
                .set_job_page_token(&job.id, listing.next_page_token.as_deref())?;

            match listing.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.store.build_sender_aggregates(&account.id)?;
        self.store
            .set_sync_status(&account.id, SyncStatus::Completed)?;
        info!(
            "full sync complete for account {}: {} upserted, {} skipped",
            account.id, outcome.upserted, outcome.skipped
        );
        Ok(outcome)
    }

    /// Incremental sync from the stored history cursor
    fn delta_sync(
        &self,
        account: &Account,
        job: &Job,
        throttle: &AdaptiveThrottle,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, SyncError> {
        let mut outcome = SyncOutcome::new(SyncMode::Delta);
        let start_history_id = account.history_id.unwrap_or(0);

        // Aggregate the whole change log first; entries are tiny
        let mut added: Vec<String> = Vec::new();
        let mut added_seen: HashSet<String> = HashSet::new();
        let mut deleted: Vec<String> = Vec::new();
        let mut label_changes: Vec<(String, Vec<String>, Vec<String>)> = Vec::new();
        let mut max_history_id = start_history_id;

        let mut page_token: Option<String> = None;
        loop {
            let response = match self.tokens.with_token(&account.id, |t| {
                self.api
                    .list_history(t, start_history_id, page_token.as_deref())
            }) {
                Ok(response) => response,
                Err(GmailError::HistoryExpired) => {
                    // The cursor fell off the retention window; the only
                    // safe reconciliation is a fresh baseline
                    warn!(
                        "history cursor expired for account {}, falling back to full resync",
                        account.id
                    );
                    self.store.set_job_page_token(&job.id, None)?;
                    let mut full =
                        self.full_sync(account, job, throttle, cancel, true)?;
                    full.escalated = true;
                    return Ok(full);
                }
                Err(e) => return Err(SyncError::from_gmail(e)),
            };

            if let Some(id) = response.history_id.as_deref().and_then(|h| h.parse().ok()) {
                max_history_id = max_history_id.max(id);
            }

            for record in response.history.unwrap_or_default() {
                if let Ok(id) = record.id.parse::<i64>() {
                    max_history_id = max_history_id.max(id);
                }
                for add in record.messages_added.unwrap_or_default() {
                    if added_seen.insert(add.message.id.clone()) {
                        added.push(add.message.id);
                    }
                }
                for del in record.messages_deleted.unwrap_or_default() {
                    deleted.push(del.message.id);
                }
                for change in record.labels_added.unwrap_or_default() {
                    label_changes.push((change.message.id, change.label_ids, Vec::new()));
                }
                for change in record.labels_removed.unwrap_or_default() {
                    label_changes.push((change.message.id, Vec::new(), change.label_ids));
                }
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // Deletions here mean permanent removal at the provider
        if !deleted.is_empty() {
            self.store.delete_by_ids(&account.id, &deleted)?;
            outcome.deleted += deleted.len();
        }

        // Label deltas; rows we have not mirrored yet get fetched instead
        let mut to_fetch: Vec<String> = added;
        let mut fetch_set: HashSet<String> = to_fetch.iter().cloned().collect();
        for (message_id, add, remove) in label_changes {
            if fetch_set.contains(&message_id) {
                continue;
            }
            match self
                .store
                .update_labels(&account.id, &message_id, &add, &remove)?
            {
                LabelUpdate::Applied => outcome.label_updates += 1,
                LabelUpdate::NotFound => {
                    if fetch_set.insert(message_id.clone()) {
                        to_fetch.push(message_id);
                    }
                }
            }
        }

        let total = (to_fetch.len() + outcome.deleted + outcome.label_updates) as i64;
        self.store.update_job_progress(
            &job.id,
            (outcome.deleted + outcome.label_updates) as i64,
            Some(total),
        )?;

        if !to_fetch.is_empty() {
            let mut processed = (outcome.deleted + outcome.label_updates) as i64;
            let stats = self.fetch_chunks(
                &account.id,
                &job.id,
                to_fetch,
                throttle,
                cancel,
                &mut processed,
            )?;
            outcome.fetched += stats.fetched;
            outcome.upserted += stats.upserted;
            outcome.deleted += stats.tombstoned;
            outcome.skipped += stats.skipped;
            if stats.cancelled {
                outcome.cancelled = true;
                return Ok(outcome);
            }
        }

        // Advance the cursor last; it never decreases
        if max_history_id > start_history_id {
            self.store.set_history_id(&account.id, max_history_id)?;
        }
        self.store
            .set_sync_status(&account.id, SyncStatus::Completed)?;

        debug!(
            "delta sync for account {}: +{} fetched, -{} deleted, {} label updates",
            account.id, outcome.fetched, outcome.deleted, outcome.label_updates
        );
        Ok(outcome)
    }

    /// Fetch metadata for a set of ids in throttled batches and persist
    /// each chunk in one transaction before starting the next
    fn fetch_chunks(
        &self,
        account_id: &str,
        job_id: &str,
        ids: Vec<String>,
        throttle: &AdaptiveThrottle,
        cancel: &CancelToken,
        processed: &mut i64,
    ) -> Result<FetchStats, SyncError> {
        let mut stats = FetchStats {
            fetched: 0,
            upserted: 0,
            tombstoned: 0,
            skipped: 0,
            cancelled: false,
        };
        let mut pending: VecDeque<String> = ids.into();
        let mut stalled_attempts: u32 = 0;

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                return Ok(stats);
            }

            let chunk_size = throttle
                .concurrency()
                .clamp(1, self.config.batch_size);
            let chunk: Vec<String> = {
                let take = chunk_size.min(pending.len());
                pending.drain(..take).collect()
            };

            throttle.wait();

            let fetched = self
                .tokens
                .with_token(account_id, |t| self.api.fetch_metadata(t, &chunk));

            let outcome = match fetched {
                Ok(outcome) => outcome,
                Err(GmailError::RateLimited { retry_after }) => {
                    // Re-queue at the head; a 429 is pacing, not failure
                    throttle.on_rate_limit(retry_after);
                    for id in chunk.into_iter().rev() {
                        pending.push_front(id);
                    }
                    continue;
                }
                Err(e) => return Err(SyncError::from_gmail(e)),
            };

            let mut records: Vec<EmailRecord> = Vec::new();
            let mut tombstones: Vec<String> = Vec::new();
            let mut retry: Vec<String> = Vec::new();
            let mut chunk_skipped = 0usize;
            let mut rate_limited_items = false;
            let synced_at = Utc::now().timestamp_millis();

            for item in &outcome.items {
                match &item.result {
                    Ok(message) => records.push(normalize_metadata(message, synced_at)),
                    Err(e) if e.code == 404 => {
                        // Deleted between listing and fetching
                        tombstones.push(item.id.clone());
                    }
                    Err(e) if e.code == 429 => {
                        rate_limited_items = true;
                        retry.push(item.id.clone());
                    }
                    Err(e) if e.status == BATCH_FAILED => {
                        retry.push(item.id.clone());
                    }
                    Err(e) => {
                        debug!("skipping message {}: {} {}", item.id, e.code, e.message);
                        chunk_skipped += 1;
                    }
                }
            }
            stats.skipped += chunk_skipped;

            throttle.on_batch_complete(outcome.latency, records.len());
            if rate_limited_items {
                throttle.on_rate_limit(None);
            } else if !retry.is_empty() {
                throttle.on_error();
            }

            let progress = records.len() + tombstones.len() + chunk_skipped;
            if progress == 0 && !retry.is_empty() {
                stalled_attempts += 1;
                if stalled_attempts >= MAX_STALLED_ATTEMPTS {
                    return Err(SyncError::Stalled(stalled_attempts));
                }
            } else {
                stalled_attempts = 0;
            }

            stats.fetched += records.len();
            if !records.is_empty() {
                self.store.upsert_emails(account_id, &records)?;
                stats.upserted += records.len();
            }
            if !tombstones.is_empty() {
                self.store.delete_by_ids(account_id, &tombstones)?;
                stats.tombstoned += tombstones.len();
            }
            for id in retry.into_iter().rev() {
                pending.push_front(id);
            }

            // Permanent skips count as handled so the ETA stays honest
            *processed += progress as i64;
            self.store.update_job_progress(job_id, *processed, None)?;
        }

        Ok(stats)
    }
}

/// Human-readable error with no ids or secrets
fn sanitized_error(error: &SyncError) -> String {
    match error {
        SyncError::Auth => "authorization expired".to_string(),
        SyncError::Gmail(GmailError::Api { status, .. }) => {
            format!("provider returned HTTP {}", status)
        }
        SyncError::Gmail(GmailError::Network(_)) => "network failure".to_string(),
        SyncError::Gmail(_) => "provider error".to_string(),
        SyncError::Store(_) => "local storage failure".to_string(),
        SyncError::Stalled(_) => "sync made no progress".to_string(),
    }
}
