//! Error type shared across the nanoclaw crates.

/// Errors that can occur across the orchestrator.
///
/// Each variant corresponds to a subsystem: plan contract, proposal/flat-file
/// stores, safety policy, dispatcher, runner, scheduler, or configuration.
#[derive(Debug, thiserror::Error)]
pub enum NanoclawError {
    /// Plan parsing or schema validation failure.
    #[error("plan error: {0}")]
    PlanError(String),

    /// Proposal journal or flat-document store failure.
    #[error("store error: {0}")]
    StoreError(String),

    /// Run registry (SQLite) read/write failure.
    #[error("run registry error: {0}")]
    RegistryError(String),

    /// Safety policy rejected an action.
    #[error("policy violation: {0}")]
    PolicyError(String),

    /// Dispatch signing or transport failure.
    #[error("dispatch error: {0}")]
    DispatchError(String),

    /// Runner-side execution failure.
    #[error("runner error: {0}")]
    RunnerError(String),

    /// Planner invocation failure.
    #[error("planner error: {0}")]
    PlannerError(String),

    /// Chat transport failure.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Scheduler or schedule validation failure.
    #[error("scheduler error: {0}")]
    SchedulerError(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
