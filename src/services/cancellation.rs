//! Cancellation registry for optimization runs
//!
//! Provides cooperative cancellation checked at cluster/route boundaries,
//! with RAII-based automatic cleanup via `RunGuard`.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global cancellation registry singleton
pub static CANCELLATION: Lazy<CancellationRegistry> = Lazy::new(CancellationRegistry::default);

/// RAII guard that automatically removes the run from the registry when
/// dropped. Must be kept alive for the duration of the run.
pub struct RunGuard {
    run_id: Uuid,
    registry: CancellationRegistry,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.run_id);
    }
}

/// Thread-safe registry of active runs and their cancellation tokens.
/// All operations are O(1) HashMap lookups.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    runs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    /// Register a run. Returns a `RunGuard` that must be held in scope
    /// while the run executes; dropping it removes the registration.
    pub fn register(&self, run_id: Uuid) -> RunGuard {
        self.runs.lock().insert(run_id, CancellationToken::new());
        RunGuard {
            run_id,
            registry: self.clone(),
        }
    }

    /// Cancel a run. Returns false if the run is not registered (already
    /// finished or never started).
    pub fn cancel(&self, run_id: &Uuid) -> bool {
        match self.runs.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Pre-register a cancelled token for a run still in the queue, so the
    /// orchestrator sees the cancellation at its first boundary check.
    pub fn pre_cancel(&self, run_id: Uuid) {
        let token = CancellationToken::new();
        token.cancel();
        self.runs.lock().insert(run_id, token);
    }

    /// Check if a run has been cancelled. Called at cluster/route
    /// boundaries; a single HashMap lookup under the mutex.
    pub fn is_cancelled(&self, run_id: &Uuid) -> bool {
        self.runs
            .lock()
            .get(run_id)
            .map_or(false, |t| t.is_cancelled())
    }

    /// Remove a finished run. Called automatically by `RunGuard::drop`.
    pub fn remove(&self, run_id: &Uuid) {
        self.runs.lock().remove(run_id);
    }

    #[cfg(test)]
    fn contains(&self, run_id: &Uuid) -> bool {
        self.runs.lock().contains_key(run_id)
    }
}
