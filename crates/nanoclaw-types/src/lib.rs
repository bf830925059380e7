//! Shared types for the nanoclaw chat-driven operations orchestrator.
//!
//! This crate defines the data model every other crate speaks: the closed
//! [`Action`] set, [`Plan`]s, [`Proposal`]s and their state machine,
//! background [`Run`] records, the signed [`DispatchEnvelope`], registered
//! groups, configuration, and the shared [`NanoclawError`].

pub mod action;
pub mod config;
pub mod envelope;
pub mod error;
pub mod group;
pub mod proposal;
pub mod run;
pub mod task;

pub use action::{Action, ExecutionMode, FetchMode, Plan, SshTarget};
pub use config::{CoreConfig, PlannerConfig, RunnerConfig, WebhookConfig};
pub use envelope::{
    ActionResult, DispatchEnvelope, DispatchResponse, DISPATCH_EVENT, HEADER_DISPATCH_ID,
    HEADER_RUNNER_SECRET, HEADER_SIGNATURE, HEADER_SIGNATURE_TS,
};
pub use error::NanoclawError;
pub use group::{RegisteredGroup, MAIN_GROUP_FOLDER};
pub use proposal::{Decision, Proposal, ProposalStatus};
pub use run::{Run, RunStatus, RunUpdate};
pub use task::{ScheduleType, ScheduledTask, TaskStatus};
