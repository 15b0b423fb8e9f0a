//! Bulk mutation drivers for trash, permanent delete, and label jobs
//!
//! Each driver materializes its target id set, then walks it in chunks of
//! at most the provider's mutation cap, mirroring every chunk locally so
//! the store never drifts from the remote state. For permanent deletes the
//! local archive happens before the remote delete: the remote operation is
//! the irreversible one, and re-archiving on retry is a no-op.

use std::sync::Arc;

use log::{info, warn};

use super::CancelToken;
use crate::config::MirrorConfig;
use crate::gmail::{GmailError, MailApi, TokenManager};
use crate::models::{BulkPayload, Job, JobType, labels};
use crate::storage::MetadataStore;
use crate::sync::SyncError;
use crate::throttle::AdaptiveThrottle;

/// Attempts per chunk before the job fails (or pauses, for quota)
const MAX_CHUNK_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BulkOutcome {
    pub processed: i64,
    pub total: i64,
    /// Bytes the targeted rows occupied, surfaced as the expected reclaim
    pub bytes: i64,
    pub cancelled: bool,
}

pub(crate) struct BulkDriver {
    store: Arc<dyn MetadataStore>,
    api: Arc<dyn MailApi>,
    tokens: Arc<TokenManager>,
    config: MirrorConfig,
}

impl BulkDriver {
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

    pub fn run(
        &self,
        job: &Job,
        throttle: &AdaptiveThrottle,
        cancel: &CancelToken,
    ) -> Result<BulkOutcome, SyncError> {
        let payload = job.bulk_payload().unwrap_or_default();
        let targets = self.materialize_targets(&job.account_id, &payload)?;

        let mut processed = job.processed_messages;
        let bytes: i64 = targets.iter().map(|(_, size)| size).sum();
        let total = processed + targets.len() as i64;
        self.store
            .update_job_progress(&job.id, processed, Some(total))?;

        let mut outcome = BulkOutcome {
            processed,
            total,
            bytes,
            cancelled: false,
        };

        if targets.is_empty() {
            return Ok(outcome);
        }
        info!(
            "bulk {} for account {}: {} messages, {} bytes",
            job.job_type.as_str(),
            job.account_id,
            targets.len(),
            bytes
        );

        let ids: Vec<String> = targets.into_iter().map(|(id, _)| id).collect();
        for chunk in ids.chunks(self.config.mutation_batch_size) {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                outcome.processed = processed;
                return Ok(outcome);
            }

            self.apply_chunk(job, &payload, chunk, throttle)?;

            processed += chunk.len() as i64;
            self.store.update_job_progress(&job.id, processed, None)?;
        }

        outcome.processed = processed;
        Ok(outcome)
    }

    /// Resolve the job's filter or explicit id list into (id, size) pairs
    fn materialize_targets(
        &self,
        account_id: &str,
        payload: &BulkPayload,
    ) -> Result<Vec<(String, i64)>, SyncError> {
        if let Some(ids) = &payload.ids {
            // Explicit ids may reference rows the mirror has never seen;
            // those still go to the provider with an unknown size
            let mut targets = Vec::with_capacity(ids.len());
            for id in ids {
                let size = self
                    .store
                    .get_email(account_id, id)?
                    .map(|e| e.size_bytes)
                    .unwrap_or(0);
                targets.push((id.clone(), size));
            }
            return Ok(targets);
        }
        if let Some(filter) = &payload.filter {
            return Ok(self.store.ids_with_size_for_filter(account_id, filter)?);
        }
        Ok(Vec::new())
    }

    /// Run one chunk: remote mutation plus local mirror update, with
    /// bounded retry. A 429 re-runs the chunk after the backoff window and
    /// is not counted as an attempt; persistent quota exhaustion surfaces
    /// as a rate-limit error so the runner parks the job instead of
    /// failing it.
    fn apply_chunk(
        &self,
        job: &Job,
        payload: &BulkPayload,
        chunk: &[String],
        throttle: &AdaptiveThrottle,
    ) -> Result<(), SyncError> {
        let mut attempts = 0u32;
        let mut rate_limits = 0u32;
        loop {
            throttle.wait();
            match self.apply_once(job, payload, chunk) {
                Ok(()) => return Ok(()),
                Err(SyncError::Gmail(GmailError::RateLimited { retry_after })) => {
                    throttle.on_rate_limit(retry_after);
                    rate_limits += 1;
                    if rate_limits >= MAX_CHUNK_ATTEMPTS {
                        return Err(SyncError::Gmail(GmailError::RateLimited { retry_after }));
                    }
                }
                Err(SyncError::Auth) => return Err(SyncError::Auth),
                Err(SyncError::Store(e)) => return Err(SyncError::Store(e)),
                Err(e) => {
                    attempts += 1;
                    warn!(
                        "bulk chunk attempt {} failed for job {}: {}",
                        attempts, job.id, e
                    );
                    self.store.record_job_error(&job.id, &e.to_string())?;
                    if attempts >= MAX_CHUNK_ATTEMPTS {
                        return Err(e);
                    }
                    throttle.on_error();
                }
            }
        }
    }

    fn apply_once(
        &self,
        job: &Job,
        payload: &BulkPayload,
        chunk: &[String],
    ) -> Result<(), SyncError> {
        let account_id = &job.account_id;
        match job.job_type {
            JobType::Trash => {
                let add = vec![labels::TRASH.to_string()];
                let remove = vec![labels::INBOX.to_string()];
                self.tokens
                    .with_token(account_id, |t| {
                        self.api.batch_modify(t, chunk, &add, &remove)
                    })
                    .map_err(SyncError::from_gmail)?;
                self.store.mark_trashed(account_id, chunk)?;
            }
            JobType::Delete => {
                // Archive-first: crash after this line is recoverable, the
                // reverse order could lose the metadata forever
                self.store.archive_and_delete(account_id, chunk)?;
                self.tokens
                    .with_token(account_id, |t| self.api.batch_delete(t, chunk))
                    .map_err(SyncError::from_gmail)?;
            }
            JobType::Archive => {
                self.tokens
                    .with_token(account_id, |t| {
                        self.api.batch_modify(
                            t,
                            chunk,
                            &payload.add_label_ids,
                            &payload.remove_label_ids,
                        )
                    })
                    .map_err(SyncError::from_gmail)?;
                for id in chunk {
                    self.store.update_labels(
                        account_id,
                        id,
                        &payload.add_label_ids,
                        &payload.remove_label_ids,
                    )?;
                }
            }
            JobType::Sync => unreachable!("sync jobs run through the sync engine"),
        }
        Ok(())
    }
}
