//! Runtime configuration for the mirror
//!
//! Every tunable can be overridden by environment variable; defaults track
//! Gmail's documented caps (100 ids per metadata batch, 1,000 per mutation
//! call, 500 ids per list page).

use std::path::PathBuf;
use std::time::Duration;

/// Hard per-user ceiling we never configure above, requests per second
pub const RATE_CAP: u32 = 50;
/// Floor the adaptive controller never drops the target below
pub const RATE_FLOOR: u32 = 30;

/// Tunables for the Gmail client, sync engine and job runner
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Steady-state request rate the throttle aims for
    pub target_msg_per_sec: u32,
    /// Upper bound on requests packed into one metadata batch
    pub max_concurrency: u32,
    /// Gmail cap on ids per multipart metadata batch
    pub batch_size: usize,
    /// Gmail cap on ids per batchModify / batchDelete call
    pub mutation_batch_size: usize,
    /// Ids per messages.list page
    pub page_size: u32,
    /// How often completed accounts get a delta sync enqueued
    pub delta_interval: Duration,
    /// Path of the shared SQLite database
    pub db_path: PathBuf,
    /// Base directory for mirror data
    pub data_dir: PathBuf,
    pub google_client_id: String,
    /// Sealed at rest when persisted; plaintext in memory only
    pub google_client_secret: String,
    pub redirect_url: String,
    /// 32-byte key (hex / base64 / raw) for token sealing
    pub encryption_key: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        let data_dir = config::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            target_msg_per_sec: 47,
            max_concurrency: 40,
            batch_size: 100,
            mutation_batch_size: 1000,
            page_size: 500,
            delta_interval: Duration::from_secs(300),
            db_path: data_dir.join("mirror.sqlite"),
            data_dir,
            google_client_id: String::new(),
            google_client_secret: String::new(),
            redirect_url: String::new(),
            encryption_key: String::new(),
        }
    }
}

impl MirrorConfig {
    /// Build a config from defaults plus environment overrides
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut cfg = Self {
            target_msg_per_sec: config::env_parsed(
                "GMAIL_TARGET_MSG_PER_SEC",
                defaults.target_msg_per_sec,
            ),
            max_concurrency: config::env_parsed("GMAIL_MAX_CONCURRENCY", defaults.max_concurrency),
            batch_size: config::env_parsed("GMAIL_BATCH_SIZE", defaults.batch_size),
            mutation_batch_size: config::env_parsed(
                "GMAIL_MUTATION_BATCH_SIZE",
                defaults.mutation_batch_size,
            ),
            page_size: config::env_parsed("SYNC_PAGE_SIZE", defaults.page_size),
            delta_interval: Duration::from_secs(config::env_parsed(
                "SYNC_DELTA_INTERVAL_SECS",
                defaults.delta_interval.as_secs(),
            )),
            db_path: config::env_var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            data_dir: config::env_var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            google_client_id: config::env_var("OAUTH_GOOGLE_CLIENT_ID").unwrap_or_default(),
            google_client_secret: config::env_var("OAUTH_GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            redirect_url: config::env_var("OAUTH_REDIRECT_URL").unwrap_or_default(),
            encryption_key: config::env_var("ENCRYPTION_KEY").unwrap_or_default(),
        };
        cfg.clamp();
        cfg
    }

    /// Keep tunables inside Gmail's hard limits
    pub fn clamp(&mut self) {
        self.target_msg_per_sec = self.target_msg_per_sec.clamp(RATE_FLOOR, RATE_CAP);
        self.batch_size = self.batch_size.clamp(1, 100);
        self.mutation_batch_size = self.mutation_batch_size.clamp(1, 1000);
        self.page_size = self.page_size.clamp(1, 500);
        self.max_concurrency = self.max_concurrency.clamp(1, self.batch_size as u32);
    }
}
