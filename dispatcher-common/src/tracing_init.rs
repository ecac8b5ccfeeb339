//! Shared `tracing-subscriber` initialisation, used by both binaries so
//! logging behaves identically across the coordinator and the task runner.
//!
//! Grounded on `golem_common::tracing::init_tracing_with_default_env_filter`
//! as used in `cloud-common/cloud-debugging-service/src/server.rs`, and the
//! `FmtSubscriber::builder()` pattern in `cli/golem-cli/src/main.rs`.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise a global `tracing` subscriber reading `RUST_LOG`, defaulting
/// to `info` when unset. Safe to call once per process; a second call is a
/// logic error in the caller, not something this function guards against
/// (matching the teacher's `set_global_default` usage, which also panics on
/// double-init).
pub fn init_tracing_with_default_env_filter(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
