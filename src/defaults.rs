//! Algorithm defaults

/// Maximum acceptable walking distance from home to stop, meters (R_walk)
pub const DEFAULT_WALK_RADIUS_M: f64 = 500.0;

/// Maximum students per stop (S_max)
pub const DEFAULT_MAX_STUDENTS_PER_STOP: usize = 25;

/// Seats per vehicle
pub const DEFAULT_VEHICLE_CAPACITY: u32 = 40;

/// K-Means iteration cap
pub const DEFAULT_KMEANS_MAX_ITERATIONS: u32 = 100;

/// K-Means convergence: every centroid moved less than this, meters
pub const DEFAULT_CONVERGENCE_THRESHOLD_M: f64 = 100.0;

/// Cluster rebalancing iteration cap
pub const DEFAULT_REBALANCE_BUDGET: u32 = 50;

/// Concurrently sequenced routes per run
pub const DEFAULT_SEQUENCING_CONCURRENCY: usize = 4;

/// Speed used for duration estimates when no travel matrix is available, km/h
pub const FALLBACK_SPEED_KMH: f64 = 30.0;

/// Directions leg endpoints within this distance of an input waypoint are
/// treated as the same point, meters
pub const LEG_MATCH_TOLERANCE_M: f64 = 100.0;
