//! Wire types exchanged between the coordinator and workers.
//!
//! Mirrors the coordinator's JSON surface: a batch of [`WorkItem`]s handed
//! out by `GET /work`, and a batch of completed ones submitted back via
//! `POST /results`.

use serde::{Deserialize, Serialize};

/// Outcome reported alongside a `GET /work` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// At least one item was assigned.
    Ok,
    /// The input is exhausted and every line has been committed.
    AllWorkComplete,
    /// The input is exhausted but leases are still outstanding; try again
    /// after `retry_in` seconds.
    Retry,
    /// The client could not reach the coordinator at all. Never produced by
    /// the server itself — synthesised by [`dispatcher-client`] on a
    /// transport failure.
    ServerUnavailable,
}

/// One unit of work: an input line assigned a dense, monotonic id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub work_id: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<String>,
}

/// Response body for `GET /work`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchWorkResponse {
    pub status: WorkStatus,
    #[serde(default)]
    pub items: Vec<WorkItem>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_in: Option<u64>,
}

impl BatchWorkResponse {
    pub fn ok(items: Vec<WorkItem>) -> Self {
        Self {
            status: WorkStatus::Ok,
            items,
            retry_in: None,
        }
    }

    pub fn all_work_complete() -> Self {
        Self {
            status: WorkStatus::AllWorkComplete,
            items: Vec::new(),
            retry_in: None,
        }
    }

    pub fn retry(retry_in: u64) -> Self {
        Self {
            status: WorkStatus::Retry,
            items: Vec::new(),
            retry_in: Some(retry_in),
        }
    }

    pub fn server_unavailable() -> Self {
        Self {
            status: WorkStatus::ServerUnavailable,
            items: Vec::new(),
            retry_in: None,
        }
    }
}

/// Request body for `POST /results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultSubmission {
    pub items: Vec<WorkItem>,
}

/// Response body for `POST /results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultResponse {
    pub status: WorkStatus,
    pub count: usize,
}

/// Response body for `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub last_committed_work_id: i64,
    pub next_work_id: u64,
    pub leased_count: usize,
    pub pending_count: usize,
    pub heap_size: usize,
    pub expired_reissues: u64,
}
