//! In-process abort handles for background runs.
//!
//! Each background worker registers a oneshot receiver under its run id.
//! A cancel request fires the sender, which both aborts the in-flight
//! upstream call (via `select!`) and lets the worker write the terminal
//! `cancelled` state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Registry of abort handles keyed by run id.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an abort handle for a run. Returns the receiver the worker
    /// selects on.
    pub fn register(&self, run_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("cancel registry lock poisoned")
            .insert(run_id.to_string(), tx);
        rx
    }

    /// Fire the abort handle for a run, if one is registered.
    /// Returns `true` when a live handle was fired.
    pub fn cancel(&self, run_id: &str) -> bool {
        let sender = self
            .inner
            .lock()
            .expect("cancel registry lock poisoned")
            .remove(run_id);
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Drop a run's handle once the worker reaches a terminal state.
    pub fn remove(&self, run_id: &str) {
        self.inner
            .lock()
            .expect("cancel registry lock poisoned")
            .remove(run_id);
    }
}
