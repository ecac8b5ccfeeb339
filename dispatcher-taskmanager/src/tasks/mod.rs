//! Shipped demo tasks. Real deployments implement their own [`crate::task::Task`]
//! or [`crate::task::GeneratorFlow`] and register it alongside these (see
//! `dispatcher-run`'s `--task` registry).

pub mod compare_two_responses;
pub mod echo;
