//! Shared error kinds. Each crate that needs a more specific error type
//! wraps or extends these rather than inventing parallel ad-hoc variants.
//!
//! spec.md §7's `TransportUnavailable`/`NoWorkYet`/`AllDone` are deliberately
//! not modeled as variants here: the client never raises for them, it maps
//! them to [`crate::wire::WorkStatus`] values instead (`server_unavailable`,
//! `retry`, `all_work_complete`) so callers branch on status rather than
//! catch an error, matching `dispatcher-client`'s `WorkClient`.

use thiserror::Error;

/// Errors that can occur while talking to, or running, the coordinator.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("checkpoint file at {path} exists but could not be parsed: {source}")]
    CheckpointCorrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write checkpoint to {path}: {source}")]
    CheckpointWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input record at line {line}: {source}")]
    MalformedInputRecord {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("backend request failed: {0}")]
    BackendRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}
