//! The runner: accepts signed dispatches over HTTP and executes approved
//! actions, serially for ungrouped actions and concurrently (bounded) for
//! parallel groups. Background code tasks are tracked in the run registry
//! with in-process abort handles.

pub mod cancel;
pub mod exec;
pub mod fetch;
pub mod forward;
pub mod opencode;
pub mod server;
pub mod ssh;

pub use cancel::CancelRegistry;
pub use server::{router, AppState};
