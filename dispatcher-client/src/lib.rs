//! Thin RPC client used by workers to talk to the coordinator.
//!
//! Grounded on `examples/original_source/dispatcher/client.py`'s `WorkClient`:
//! connection failures map to [`WorkStatus::ServerUnavailable`] rather than
//! raising, and a `404` is treated as `all_work_complete`. The client is
//! stateless and cheap to clone, matching the teacher's preference for
//! `reqwest::Client`-backed, `Clone`-able RPC wrappers
//! (`cloud-common/src/clients/limit.rs`'s `LimitServiceDefault` holds a
//! similarly cheap inner client).

use std::time::Duration;

use dispatcher_common::wire::{
    BatchResultResponse, BatchResultSubmission, BatchWorkResponse, StatusResponse, WorkItem,
    WorkStatus,
};
use reqwest::StatusCode;

/// Bounded exponential backoff applied by callers between `server_unavailable`
/// retries. Not part of the original `client.py`, which left retry policy to
/// the caller (spec.md §9 open question) — this expansion fixes a concrete,
/// configurable policy.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay to use after `attempt` consecutive failures (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }
}

/// RPC client for the coordinator's `/work`, `/results`, and `/status`
/// endpoints. Safe to clone and share across worker tasks: `reqwest::Client`
/// pools its own connections internally.
#[derive(Debug, Clone)]
pub struct WorkClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkClient {
    /// Build a client for `server_url`, which may be given with or without
    /// a scheme (`host:port` is treated as `http://host:port`, matching the
    /// original's lenient constructor).
    pub fn new(server_url: impl AsRef<str>) -> Self {
        let raw = server_url.as_ref();
        let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        Self {
            base_url: with_scheme.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch up to `batch_size` work items from the coordinator. Connection
    /// failures become [`WorkStatus::ServerUnavailable`] rather than an
    /// error, so callers can loop on status alone.
    pub async fn get_work(&self, batch_size: usize) -> BatchWorkResponse {
        let url = format!("{}/work", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("batch_size", batch_size)])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = %err, "coordinator unreachable");
                return BatchWorkResponse::server_unavailable();
            }
        };

        if resp.status() == StatusCode::NOT_FOUND {
            return BatchWorkResponse::all_work_complete();
        }

        match resp.error_for_status() {
            Ok(resp) => resp
                .json::<BatchWorkResponse>()
                .await
                .unwrap_or_else(|_| BatchWorkResponse::server_unavailable()),
            Err(err) => {
                tracing::warn!(error = %err, "coordinator returned an error status");
                BatchWorkResponse::server_unavailable()
            }
        }
    }

    /// Submit completed work items. Items without a `result` are dropped by
    /// the server, matching `complete_work_batch`'s contract.
    pub async fn submit_results(&self, items: Vec<WorkItem>) -> BatchResultResponse {
        let url = format!("{}/results", self.base_url);
        let body = BatchResultSubmission { items };

        let resp = self.http.post(&url).json(&body).send().await;
        let resp = match resp {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = %err, "coordinator unreachable");
                return BatchResultResponse {
                    status: WorkStatus::ServerUnavailable,
                    count: 0,
                };
            }
        };

        match resp.error_for_status() {
            Ok(resp) => resp.json::<BatchResultResponse>().await.unwrap_or(BatchResultResponse {
                status: WorkStatus::ServerUnavailable,
                count: 0,
            }),
            Err(err) => {
                tracing::warn!(error = %err, "coordinator rejected results submission");
                BatchResultResponse {
                    status: WorkStatus::ServerUnavailable,
                    count: 0,
                }
            }
        }
    }

    /// Fetch the coordinator's counters, or `None` if it is unreachable.
    pub async fn status(&self) -> Option<StatusResponse> {
        let url = format!("{}/status", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .json::<StatusResponse>()
            .await
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_http_scheme_when_missing() {
        let client = WorkClient::new("localhost:8000");
        assert_eq!(client.base_url, "http://localhost:8000");
    }

    #[test]
    fn keeps_explicit_scheme() {
        let client = WorkClient::new("https://example.com/");
        assert_eq!(client.base_url, "https://example.com");
    }

    #[tokio::test]
    async fn get_work_against_unreachable_server_is_server_unavailable() {
        let client = WorkClient::new("127.0.0.1:1");
        let resp = client.get_work(1).await;
        assert_eq!(resp.status, WorkStatus::ServerUnavailable);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert!(policy.delay_for(20) <= policy.max);
    }
}
