//! Planning error taxonomy
//!
//! Only conditions the orchestrator must react to surface here. Mapping
//! collaborator failures never do: every call site recovers locally with
//! its documented fallback (raw coordinate, generated label, great-circle
//! ordering) and logs the degradation instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanningError {
    /// A unit of demand cannot be served even after splitting.
    /// Fatal for that cluster/route only; the run continues.
    #[error("vehicle capacity {capacity} cannot serve demand {demand}")]
    CapacityUnsatisfiable { capacity: u32, demand: u32 },

    /// Duplicate stop key race during upsert that survived the one
    /// re-query retry.
    #[error("persistence conflict for stop '{0}'")]
    PersistenceConflict(String),

    /// The run was cancelled at a cluster/route boundary.
    #[error("optimization run cancelled")]
    Cancelled,
}
