//! Task-runner config layer, loaded via [`dispatcher_common::config`] and
//! overridden by CLI flags afterward, mirroring the coordinator's
//! `dispatcher-coordinator::config`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    pub workers: usize,
    pub max_active_tasks: usize,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub request_timeout: std::time::Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            workers: 16,
            max_active_tasks: 1000,
            batch_size: 4,
            request_timeout: std::time::Duration::from_secs(600),
        }
    }
}
