//! Durable, serial-per-account job scheduler
//!
//! The store is the queue: `tick` promotes at most one pending/paused job
//! per account to running via a status CAS, then executes it on a worker
//! thread. Crash recovery demotes orphaned running jobs to paused on
//! startup; the next tick resumes them in creation order with a progress
//! snapshot for post-resume ETA math.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use super::bulk::BulkDriver;
use super::{AccountHealth, CancelToken};
use crate::config::MirrorConfig;
use crate::gmail::{GmailError, MailApi, TokenManager};
use crate::models::{BulkPayload, EmailFilter, Job, JobStatus, JobType, SyncStatus};
use crate::storage::{MetadataStore, StoreResult};
use crate::sync::{SyncEngine, SyncError};
use crate::throttle::{AdaptiveThrottle, ThrottleConfig};

/// Failed jobs re-run until they have burned this many retries
const MAX_JOB_RETRIES: i64 = 3;

/// Scheduler over the durable jobs table
pub struct JobRunner {
    store: Arc<dyn MetadataStore>,
    api: Arc<dyn MailApi>,
    tokens: Arc<TokenManager>,
    config: MirrorConfig,
    /// One throttle per account, shared by every job of that account
    throttles: Mutex<HashMap<String, Arc<AdaptiveThrottle>>>,
    /// Cancel flags for currently executing jobs
    active: Mutex<HashMap<String, CancelToken>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        api: Arc<dyn MailApi>,
        tokens: Arc<TokenManager>,
        config: MirrorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            api,
            tokens,
            config,
            throttles: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        })
    }

    fn throttle_for(&self, account_id: &str) -> Arc<AdaptiveThrottle> {
        let mut throttles = self.throttles.lock().unwrap();
        throttles
            .entry(account_id.to_string())
            .or_insert_with(|| {
                Arc::new(AdaptiveThrottle::new(ThrottleConfig::for_rate(
                    self.config.target_msg_per_sec,
                    self.config.max_concurrency,
                )))
            })
            .clone()
    }

    // === Mutation API ===

    pub fn enqueue_sync(&self, account_id: &str, user_id: &str) -> StoreResult<Job> {
        self.enqueue(account_id, user_id, JobType::Sync, None)
    }

    pub fn enqueue_trash(
        &self,
        account_id: &str,
        user_id: &str,
        filter: EmailFilter,
    ) -> StoreResult<Job> {
        self.enqueue(
            account_id,
            user_id,
            JobType::Trash,
            Some(BulkPayload {
                filter: Some(filter),
                ..Default::default()
            }),
        )
    }

    pub fn enqueue_delete(
        &self,
        account_id: &str,
        user_id: &str,
        filter: EmailFilter,
    ) -> StoreResult<Job> {
        self.enqueue(
            account_id,
            user_id,
            JobType::Delete,
            Some(BulkPayload {
                filter: Some(filter),
                ..Default::default()
            }),
        )
    }

    pub fn enqueue_apply_label(
        &self,
        account_id: &str,
        user_id: &str,
        filter: EmailFilter,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    ) -> StoreResult<Job> {
        self.enqueue(
            account_id,
            user_id,
            JobType::Archive,
            Some(BulkPayload {
                filter: Some(filter),
                ids: None,
                add_label_ids,
                remove_label_ids,
            }),
        )
    }

    /// Insert a pending job row
    pub fn enqueue(
        &self,
        account_id: &str,
        user_id: &str,
        job_type: JobType,
        payload: Option<BulkPayload>,
    ) -> StoreResult<Job> {
        let job = Job::new(account_id, user_id, job_type, payload);
        self.store.insert_job(&job)?;
        info!(
            "enqueued {} job {} for account {}",
            job_type.as_str(),
            job.id,
            account_id
        );
        Ok(job)
    }

    /// Cancel a job; running workers stop at their next chunk boundary
    pub fn cancel(&self, job_id: &str) -> StoreResult<bool> {
        let changed = self.store.transition_job(
            job_id,
            &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused],
            JobStatus::Cancelled,
        )?;
        if let Some(token) = self.active.lock().unwrap().get(job_id) {
            token.cancel();
        }
        Ok(changed)
    }

    /// Park a job; the scheduler resumes it on a later tick
    pub fn pause(&self, job_id: &str) -> StoreResult<bool> {
        let changed = self.store.transition_job(
            job_id,
            &[JobStatus::Pending, JobStatus::Running],
            JobStatus::Paused,
        )?;
        if let Some(token) = self.active.lock().unwrap().get(job_id) {
            token.cancel();
        }
        Ok(changed)
    }

    pub fn resume(&self, job_id: &str) -> StoreResult<bool> {
        self.store
            .transition_job(job_id, &[JobStatus::Paused], JobStatus::Pending)
    }

    /// Demote jobs orphaned in running by a previous process
    pub fn recover_on_startup(&self) -> StoreResult<usize> {
        let orphaned = self.store.jobs_in_status(&[JobStatus::Running])?;
        let mut demoted = 0;
        for job in orphaned {
            if self
                .store
                .transition_job(&job.id, &[JobStatus::Running], JobStatus::Paused)?
            {
                warn!("demoted orphaned running job {} to paused", job.id);
                demoted += 1;
            }
        }
        Ok(demoted)
    }

    /// Promote one runnable job per account and execute each on a worker
    /// thread. Returns the workers' join handles.
    pub fn tick(self: &Arc<Self>) -> StoreResult<Vec<JoinHandle<()>>> {
        let mut claimed: HashSet<String> = self
            .store
            .jobs_in_status(&[JobStatus::Running])?
            .into_iter()
            .map(|j| j.account_id)
            .collect();

        let mut candidates = self
            .store
            .jobs_in_status(&[JobStatus::Pending, JobStatus::Paused])?;
        candidates.extend(
            self.store
                .jobs_in_status(&[JobStatus::Failed])?
                .into_iter()
                .filter(|j| j.retry_count <= MAX_JOB_RETRIES),
        );
        candidates.sort_by_key(|j| j.created_at);

        let mut handles = Vec::new();
        for job in candidates {
            if claimed.contains(&job.account_id) {
                continue;
            }
            let Some(account) = self.store.get_account(&job.account_id)? else {
                continue;
            };
            // No scheduling for accounts awaiting re-auth
            if account.sync_status == SyncStatus::AuthExpired {
                continue;
            }

            if !self
                .store
                .transition_job(&job.id, &[job.status], JobStatus::Running)?
            {
                continue;
            }
            if job.status != JobStatus::Pending {
                self.store.mark_job_resumed(&job.id)?;
            }
            claimed.insert(job.account_id.clone());

            let runner = Arc::clone(self);
            let job_id = job.id.clone();
            handles.push(thread::spawn(move || runner.execute(&job_id)));
        }
        Ok(handles)
    }

    /// Worker body: dispatch to the right driver and record terminal state
    fn execute(&self, job_id: &str) {
        let job = match self.store.get_job(job_id) {
            Ok(Some(job)) => job,
            _ => return,
        };

        let cancel = CancelToken::new();
        self.active
            .lock()
            .unwrap()
            .insert(job_id.to_string(), cancel.clone());
        let throttle = self.throttle_for(&job.account_id);

        let result = match job.job_type {
            JobType::Sync => {
                let engine = SyncEngine::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.api),
                    Arc::clone(&self.tokens),
                    self.config.clone(),
                );
                engine
                    .run_sync_job(&job, &throttle, &cancel)
                    .map(|outcome| outcome.cancelled)
            }
            JobType::Trash | JobType::Delete | JobType::Archive => {
                let driver = BulkDriver::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.api),
                    Arc::clone(&self.tokens),
                    self.config.clone(),
                );
                driver.run(&job, &throttle, &cancel).map(|outcome| {
                    info!(
                        "job {} moved {}/{} messages (~{} bytes)",
                        job_id, outcome.processed, outcome.total, outcome.bytes
                    );
                    outcome.cancelled
                })
            }
        };

        self.active.lock().unwrap().remove(job_id);

        let settle = |to: JobStatus| {
            let _ = self
                .store
                .transition_job(job_id, &[JobStatus::Running], to);
        };

        match result {
            // Stopped at a boundary: cancel() or pause() already moved the
            // status, so this CAS is a no-op in those cases
            Ok(true) => settle(JobStatus::Cancelled),
            Ok(false) => {
                info!("job {} completed", job_id);
                settle(JobStatus::Completed);
            }
            Err(SyncError::Auth) => {
                let _ = self.store.record_job_error(job_id, "authorization expired");
                settle(JobStatus::Paused);
            }
            Err(SyncError::Gmail(GmailError::RateLimited { .. })) => {
                // Quota exhaustion parks the job for a later tick
                let _ = self.store.record_job_error(job_id, "quota exhausted");
                settle(JobStatus::Paused);
            }
            Err(e) => {
                warn!("job {} failed: {}", job_id, e);
                let _ = self.store.record_job_error(job_id, &e.to_string());
                settle(JobStatus::Failed);
            }
        }
    }

    /// Periodically enqueue delta syncs for completed accounts
    ///
    /// Every interval, any account whose last sync finished more than the
    /// interval ago and which has no active sync job gets one enqueued,
    /// and a tick runs. The loop exits when `stop` is flagged.
    pub fn schedule_delta_sync(
        self: &Arc<Self>,
        interval: Duration,
        stop: CancelToken,
    ) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        thread::spawn(move || {
            while !stop.is_cancelled() {
                // Sleep in short slices so shutdown stays prompt
                let mut slept = Duration::ZERO;
                while slept < interval && !stop.is_cancelled() {
                    let slice = Duration::from_secs(1).min(interval - slept);
                    thread::sleep(slice);
                    slept += slice;
                }
                if stop.is_cancelled() {
                    break;
                }
                if let Err(e) = runner.delta_tick(interval) {
                    warn!("delta scheduler tick failed: {}", e);
                }
            }
        })
    }

    /// One pass of the delta scheduler; public so embedders with their own
    /// timers can drive it directly
    pub fn delta_tick(self: &Arc<Self>, interval: Duration) -> StoreResult<usize> {
        let now = Utc::now().timestamp_millis();
        let due_before = now - interval.as_millis() as i64;

        let mut enqueued = 0;
        for account in self.store.list_accounts()? {
            if account.sync_status != SyncStatus::Completed {
                continue;
            }
            if account.sync_completed_at.is_some_and(|t| t > due_before) {
                continue;
            }
            if self.store.has_active_job(&account.id, JobType::Sync)? {
                continue;
            }
            self.enqueue_sync(&account.id, &account.user_id)?;
            enqueued += 1;
        }

        for handle in self.tick()? {
            // Detach: the scheduler thread must not serialize accounts
            drop(handle);
        }
        Ok(enqueued)
    }

    /// Health snapshot for one account
    pub fn account_health(&self, account_id: &str) -> StoreResult<Option<AccountHealth>> {
        let Some(account) = self.store.get_account(account_id)? else {
            return Ok(None);
        };
        let jobs = self.store.jobs_for_account(account_id)?;
        let current = jobs.first();
        let throttle = self
            .throttles
            .lock()
            .unwrap()
            .get(account_id)
            .map(|t| t.stats());

        Ok(Some(AccountHealth {
            account_id: account.id,
            sync_status: account.sync_status,
            processed_messages: current.map(|j| j.processed_messages).unwrap_or(0),
            total_messages: current.map(|j| j.total_messages).unwrap_or(0),
            last_error: account
                .sync_error
                .or_else(|| current.and_then(|j| j.last_error.clone())),
            throttle,
        }))
    }
}
