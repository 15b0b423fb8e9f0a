//! Gmail API HTTP client
//!
//! Raw HTTP against the Gmail REST endpoints, using synchronous ureq to be
//! executor-agnostic. Pacing and parallelism are imposed by the caller;
//! the client itself is stateless apart from its connection pools.

use std::time::{Duration, Instant};

use log::{debug, warn};
use ureq::Agent;

use super::api::{
    BatchDeleteRequest, BatchModifyRequest, GmailLabel, GmailMessage, HistoryResponse,
    ListLabelsResponse, ListMessagesResponse, Profile,
};
use super::{
    BatchFetchOutcome, BatchItem, GmailError, ItemError, MailApi, MessageFormat,
    encode_batch_request, new_boundary, parse_batch_response,
};

/// Gmail REST v1 client
pub struct GmailClient {
    /// Pool for batch and mutation calls (long deadline)
    agent: Agent,
    /// Pool for single JSON calls (short deadline)
    quick: Agent,
    base_url: String,
    batch_url: String,
}

impl GmailClient {
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";
    const BATCH_URL: &'static str = "https://gmail.googleapis.com/batch/gmail/v1";

    /// Deadline for one multipart batch or bulk mutation
    const BATCH_TIMEOUT: Duration = Duration::from_secs(60);
    /// Deadline for a single JSON endpoint call
    const CALL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Gmail caps per call
    pub const MAX_BATCH_GET: usize = 100;
    pub const MAX_BATCH_MUTATE: usize = 1000;

    pub fn new() -> Self {
        Self::with_base_urls(Self::BASE_URL, Self::BATCH_URL)
    }

    /// Point the client somewhere else (tests against a local server)
    pub fn with_base_urls(base_url: impl Into<String>, batch_url: impl Into<String>) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Self::BATCH_TIMEOUT))
            .build()
            .new_agent();
        let quick = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Self::CALL_TIMEOUT))
            .build()
            .new_agent();
        Self {
            agent,
            quick,
            base_url: base_url.into(),
            batch_url: batch_url.into(),
        }
    }

    /// Map a non-2xx response to the error taxonomy
    fn check(
        mut response: ureq::http::Response<ureq::Body>,
    ) -> Result<ureq::http::Response<ureq::Body>, GmailError> {
        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 => Err(GmailError::Unauthorized),
            404 => Err(GmailError::NotFound),
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(GmailError::RateLimited { retry_after })
            }
            _ => {
                let message = response
                    .body_mut()
                    .read_to_string()
                    .unwrap_or_default()
                    .chars()
                    .take(200)
                    .collect();
                Err(GmailError::Api { status, message })
            }
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
    ) -> Result<T, GmailError> {
        let response = self
            .quick
            .get(url)
            .header("Authorization", &format!("Bearer {}", token))
            .call()
            .map_err(|e| GmailError::Network(e.to_string()))?;

        Self::check(response)?
            .body_mut()
            .read_json()
            .map_err(|e| GmailError::BadResponse(e.to_string()))
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MailApi for GmailClient {
    fn get_profile(&self, token: &str) -> Result<Profile, GmailError> {
        let url = format!("{}/users/me/profile", self.base_url);
        self.get_json(token, &url)
    }

    fn list_messages(
        &self,
        token: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, GmailError> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}&includeSpamTrash=true",
            self.base_url,
            max_results.min(500)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        self.get_json(token, &url)
    }

    fn list_history(
        &self,
        token: &str,
        start_history_id: i64,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, GmailError> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}",
            self.base_url, start_history_id
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        // A 404 here means the cursor fell off Gmail's retention window
        match self.get_json(token, &url) {
            Err(GmailError::NotFound) => Err(GmailError::HistoryExpired),
            other => other,
        }
    }

    fn fetch_metadata(&self, token: &str, ids: &[String]) -> Result<BatchFetchOutcome, GmailError> {
        if ids.len() > Self::MAX_BATCH_GET {
            return Err(GmailError::TooManyIds(ids.len()));
        }
        if ids.is_empty() {
            return Ok(BatchFetchOutcome {
                items: Vec::new(),
                latency: Duration::ZERO,
            });
        }

        let boundary = new_boundary();
        let body = encode_batch_request(&boundary, ids, MessageFormat::Metadata);

        let started = Instant::now();
        let response = self
            .agent
            .post(&self.batch_url)
            .header("Authorization", &format!("Bearer {}", token))
            .header(
                "Content-Type",
                &format!("multipart/mixed; boundary={}", boundary),
            )
            .send(body);
        let latency = started.elapsed();

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // Whole-batch network failure: every item is flagged so the
                // caller can retry the chunk
                warn!("batch request failed outright: {}", e);
                return Ok(BatchFetchOutcome {
                    items: all_failed(ids, &e.to_string()),
                    latency,
                });
            }
        };

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            401 => return Err(GmailError::Unauthorized),
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(GmailError::RateLimited { retry_after });
            }
            _ => {
                warn!("batch envelope returned HTTP {}", status);
                return Ok(BatchFetchOutcome {
                    items: all_failed(ids, &format!("HTTP {}", status)),
                    latency,
                });
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let mut response = response;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| GmailError::BadResponse(e.to_string()))?;

        let items = parse_batch_response(content_type.as_deref(), &text, ids)?;
        debug!(
            "batch of {} returned in {}ms",
            ids.len(),
            latency.as_millis()
        );
        Ok(BatchFetchOutcome { items, latency })
    }

    fn batch_modify(
        &self,
        token: &str,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), GmailError> {
        if ids.is_empty() {
            return Ok(());
        }
        if ids.len() > Self::MAX_BATCH_MUTATE {
            return Err(GmailError::TooManyIds(ids.len()));
        }

        let url = format!("{}/users/me/messages/batchModify", self.base_url);
        let request = BatchModifyRequest {
            ids: ids.to_vec(),
            add_label_ids: add_label_ids.to_vec(),
            remove_label_ids: remove_label_ids.to_vec(),
        };

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", token))
            .send_json(&request)
            .map_err(|e| GmailError::Network(e.to_string()))?;
        Self::check(response)?;
        debug!(
            "batch modified {} messages: +{:?} -{:?}",
            ids.len(),
            add_label_ids,
            remove_label_ids
        );
        Ok(())
    }

    fn batch_delete(&self, token: &str, ids: &[String]) -> Result<(), GmailError> {
        if ids.is_empty() {
            return Ok(());
        }
        if ids.len() > Self::MAX_BATCH_MUTATE {
            return Err(GmailError::TooManyIds(ids.len()));
        }

        let url = format!("{}/users/me/messages/batchDelete", self.base_url);
        let request = BatchDeleteRequest { ids: ids.to_vec() };

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", token))
            .send_json(&request)
            .map_err(|e| GmailError::Network(e.to_string()))?;
        match Self::check(response) {
            // Deleting an already-gone id is a success for our purposes
            Err(GmailError::NotFound) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn list_labels(&self, token: &str) -> Result<Vec<GmailLabel>, GmailError> {
        let url = format!("{}/users/me/labels", self.base_url);
        let response: ListLabelsResponse = self.get_json(token, &url)?;
        Ok(response.labels.unwrap_or_default())
    }
}

/// Build the all-items-failed vector for a whole-batch failure
fn all_failed(ids: &[String], message: &str) -> Vec<BatchItem> {
    ids.iter()
        .map(|id| BatchItem {
            id: id.clone(),
            result: Err(ItemError {
                code: 0,
                message: message.to_string(),
                status: super::BATCH_FAILED.to_string(),
            }),
        })
        .collect()
}

/// Fetch a single message (used outside the batch path)
impl GmailClient {
    pub fn get_message(
        &self,
        token: &str,
        id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, GmailError> {
        let url = format!(
            "{}/users/me/messages/{}?format={}",
            self.base_url,
            id,
            format.as_str()
        );
        self.get_json(token, &url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_metadata_batch_rejected() {
        let client = GmailClient::new();
        let ids: Vec<String> = (0..101).map(|i| format!("m{}", i)).collect();
        assert!(matches!(
            client.fetch_metadata("tok", &ids),
            Err(GmailError::TooManyIds(101))
        ));
    }

    #[test]
    fn test_empty_metadata_batch_is_noop() {
        let client = GmailClient::new();
        let outcome = client.fetch_metadata("tok", &[]).unwrap();
        assert!(outcome.items.is_empty());
    }

    #[test]
    fn test_oversized_mutation_rejected() {
        let client = GmailClient::new();
        let ids: Vec<String> = (0..1001).map(|i| format!("m{}", i)).collect();
        assert!(matches!(
            client.batch_delete("tok", &ids),
            Err(GmailError::TooManyIds(1001))
        ));
        assert!(matches!(
            client.batch_modify("tok", &ids, &[], &[]),
            Err(GmailError::TooManyIds(1001))
        ));
    }

    #[test]
    fn test_empty_mutation_is_noop() {
        // No ids means no HTTP call and immediate success
        let client = GmailClient::new();
        assert!(client.batch_delete("tok", &[]).is_ok());
        assert!(client.batch_modify("tok", &[], &[], &[]).is_ok());
    }

    #[test]
    fn test_all_failed_marks_every_item() {
        let ids: Vec<String> = vec!["a".to_string(), "b".to_string()];
        let items = all_failed(&ids, "connection reset");
        assert_eq!(items.len(), 2);
        for item in &items {
            let err = item.result.as_ref().unwrap_err();
            assert_eq!(err.status, super::super::BATCH_FAILED);
        }
    }
}
