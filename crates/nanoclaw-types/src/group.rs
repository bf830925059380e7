//! Registered chat groups and per-group planner sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The folder name reserved for the privileged main group.
pub const MAIN_GROUP_FOLDER: &str = "main";

/// A chat group registered with the orchestrator.
///
/// The `folder` doubles as the group's cooperative namespace for on-disk IPC:
/// files under `data/ipc/<folder>/` are treated as authored by this group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredGroup {
    pub name: String,
    pub folder: String,
    /// Trigger word that addresses the assistant in this group.
    pub trigger: String,
    pub added_at: DateTime<Utc>,
}

impl RegisteredGroup {
    /// Whether this group is the privileged main group.
    pub fn is_main(&self) -> bool {
        self.folder == MAIN_GROUP_FOLDER
    }
}
