//! Shared types, error kinds, configuration, and tracing setup used by both
//! the coordinator and the task manager binaries.

pub mod backend;
pub mod config;
pub mod error;
pub mod tracing_init;
pub mod wire;

pub use error::DispatcherError;
