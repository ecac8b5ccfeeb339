//! Coordinator-specific config layer, loaded via [`dispatcher_common::config`]
//! and overridden by CLI flags afterward.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(with = "humantime_serde")]
    pub work_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub completion_poll_interval: std::time::Duration,
    pub retry_interval_secs: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            work_timeout: std::time::Duration::from_secs(900),
            checkpoint_interval: std::time::Duration::from_secs(60),
            completion_poll_interval: std::time::Duration::from_secs(5),
            retry_interval_secs: 5,
        }
    }
}
