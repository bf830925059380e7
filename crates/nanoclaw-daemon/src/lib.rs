//! The nanoclaw daemon: chat-driven orchestration core.
//!
//! Three cooperative loops, each owning its mutable state: the message loop
//! (inbound chat -> planner turns -> proposals), the IPC watcher (on-disk
//! requests from agents and containers), and the scheduler (cron / interval /
//! one-shot planner turns). The approval gateway sits on the message loop's
//! ingress and is the only mutator of proposal status.

pub mod channel;
pub mod gateway;
pub mod ipc;
pub mod memory;
pub mod planner;
pub mod router;
pub mod sched;
pub mod testing;
pub mod turn;

pub use channel::{chunk_message, ChatTransport, HttpTransport, InboundMessage, NullTransport};
pub use gateway::ApprovalGateway;
pub use ipc::{write_ipc_file, IpcWatcher};
pub use memory::{MemoryProvider, NoopMemory};
pub use planner::{HttpPlanner, Planner, PlannerReply, PLANNER_FALLBACK_REPLY};
pub use router::MessageLoop;
pub use sched::{compute_first_run, next_cron_occurrence, parse_interval_ms, Scheduler};
pub use turn::{run_planner_turn, TurnDeps, TurnOutcome};
