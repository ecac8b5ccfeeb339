//! The dispatcher coordinator: lease table, pending-result buffer, output
//! writer, checkpoint store, and the HTTP surface workers talk to.

mod state;
pub mod config;
pub mod server;

pub use state::{Assignment, Coordinator, Status};
