//! OAuth token vault
//!
//! Tokens live sealed in the store; this accessor is the single decryption
//! point. Access tokens are refreshed when within five minutes of expiry,
//! and refreshes are serialized per account so concurrent callers never
//! race Google's token endpoint with the same refresh token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use ureq::Agent;

use super::GmailError;
use crate::crypto::{CryptoError, SecretBox};
use crate::storage::{MetadataStore, StoreError, StoredToken};

/// Refresh when the access token is within this window of expiring
const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no stored token for account {0}")]
    MissingToken(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),
    #[error("token endpoint unreachable: {0}")]
    Network(String),
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// Store-backed token accessor with per-account single-flight refresh
pub struct TokenManager {
    store: Arc<dyn MetadataStore>,
    secrets: SecretBox,
    client_id: String,
    client_secret: String,
    token_url: String,
    agent: Agent,
    cache: Mutex<HashMap<String, CachedToken>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(
        store: Arc<dyn MetadataStore>,
        secrets: SecretBox,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self::with_token_url(store, secrets, client_id, client_secret, Self::TOKEN_URL)
    }

    /// Point the refresh flow somewhere else (tests)
    pub fn with_token_url(
        store: Arc<dyn MetadataStore>,
        secrets: SecretBox,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(10)))
            .build()
            .new_agent();
        Self {
            store,
            secrets,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            agent,
            cache: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Seal and persist a token handed over by the auth collaborator
    pub fn store_initial(
        &self,
        account_id: &str,
        access_token: &str,
        refresh_token: &str,
        scope: Option<&str>,
        expires_at: i64,
    ) -> Result<(), AuthError> {
        let sealed = StoredToken {
            access_token: self.secrets.seal(access_token)?,
            refresh_token: self.secrets.seal(refresh_token)?,
            scope: scope.map(|s| s.to_string()),
            expires_at,
        };
        self.store.save_token(account_id, &sealed)?;
        self.cache.lock().unwrap().insert(
            account_id.to_string(),
            CachedToken {
                access_token: access_token.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    /// Get a valid access token, refreshing transparently when stale
    pub fn access_token(&self, account_id: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp_millis();
        if let Some(cached) = self.cache.lock().unwrap().get(account_id)
            && cached.expires_at > now + EXPIRY_BUFFER_MS
        {
            return Ok(cached.access_token.clone());
        }

        let stored = self
            .store
            .get_token(account_id)?
            .ok_or_else(|| AuthError::MissingToken(account_id.to_string()))?;

        if stored.expires_at > now + EXPIRY_BUFFER_MS {
            let access_token = self.secrets.open(&stored.access_token)?;
            self.cache.lock().unwrap().insert(
                account_id.to_string(),
                CachedToken {
                    access_token: access_token.clone(),
                    expires_at: stored.expires_at,
                },
            );
            return Ok(access_token);
        }

        self.refresh(account_id)
    }

    /// Force a refresh regardless of the stored expiry (after a 401)
    pub fn force_refresh(&self, account_id: &str) -> Result<String, AuthError> {
        self.cache.lock().unwrap().remove(account_id);
        self.refresh(account_id)
    }

    /// Refresh under the account's single-flight lock
    fn refresh(&self, account_id: &str) -> Result<String, AuthError> {
        let lock = {
            let mut locks = self.refresh_locks.lock().unwrap();
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().unwrap();

        // Another caller may have refreshed while we waited for the lock
        let now = Utc::now().timestamp_millis();
        if let Some(cached) = self.cache.lock().unwrap().get(account_id)
            && cached.expires_at > now + EXPIRY_BUFFER_MS
        {
            return Ok(cached.access_token.clone());
        }

        let stored = self
            .store
            .get_token(account_id)?
            .ok_or_else(|| AuthError::MissingToken(account_id.to_string()))?;
        let refresh_token = self.secrets.open(&stored.refresh_token)?;

        debug!("refreshing access token for account {}", account_id);
        let response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let mut response = response;
        if !response.status().is_success() {
            let body: String = response
                .body_mut()
                .read_to_string()
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            warn!(
                "token refresh for account {} rejected: HTTP {}",
                account_id,
                response.status()
            );
            return Err(AuthError::RefreshRejected(body));
        }

        let refreshed: RefreshResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::RefreshRejected(e.to_string()))?;

        let expires_at =
            Utc::now().timestamp_millis() + refreshed.expires_in.unwrap_or(3600) as i64 * 1000;
        // Google only returns a new refresh token when it rotates; keep the
        // old one otherwise
        let next_refresh = refreshed
            .refresh_token
            .as_deref()
            .unwrap_or(refresh_token.as_str());

        let sealed = StoredToken {
            access_token: self.secrets.seal(&refreshed.access_token)?,
            refresh_token: self.secrets.seal(next_refresh)?,
            scope: refreshed.scope.or(stored.scope),
            expires_at,
        };
        self.store.save_token(account_id, &sealed)?;

        self.cache.lock().unwrap().insert(
            account_id.to_string(),
            CachedToken {
                access_token: refreshed.access_token.clone(),
                expires_at,
            },
        );
        info!("refreshed access token for account {}", account_id);
        Ok(refreshed.access_token)
    }

    /// Run a Gmail call with the account's bearer, retrying exactly once
    /// through a forced refresh when the first attempt is rejected
    pub fn with_token<T>(
        &self,
        account_id: &str,
        mut call: impl FnMut(&str) -> Result<T, GmailError>,
    ) -> Result<T, GmailError> {
        let token = self
            .access_token(account_id)
            .map_err(|_| GmailError::Unauthorized)?;
        match call(&token) {
            Err(GmailError::Unauthorized) => {
                let token = self
                    .force_refresh(account_id)
                    .map_err(|_| GmailError::Unauthorized)?;
                call(&token)
            }
            other => other,
        }
    }
}
