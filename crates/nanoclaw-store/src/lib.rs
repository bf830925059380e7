//! Persistence for the orchestrator core.
//!
//! Flat JSON documents (proposal journal, watermarks, sessions, groups,
//! tasks) written with temp-then-rename atomicity, plus the SQLite-backed
//! run registry. Each store has a single writing loop; readers may see a
//! prior snapshot but never a torn one.

pub mod documents;
pub mod proposals;
pub mod runs;
pub mod state;

pub use documents::{atomic_save, load_or_default};
pub use proposals::ProposalStore;
pub use runs::{RunRegistry, LIST_CAP};
pub use state::{GroupRegistry, RouterState, SessionMap, TaskStore};
