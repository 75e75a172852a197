//! Stop and assignment types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// A physical bus-stop location produced by the stop planner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: Uuid,
    pub label: String,
    pub lat: f64,
    pub lng: f64,
    /// Reverse-geocoded address, when the mapping collaborator resolved one
    pub address: Option<String>,
    /// Number of students assigned to this stop
    pub occupancy: u32,
    pub created_at: DateTime<Utc>,
}

impl Stop {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates { lat: self.lat, lng: self.lng }
    }
}

/// One student's assignment to a stop. A student holds at most one active
/// assignment per run; persisting replaces any prior assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub student_id: Uuid,
    pub stop_id: Uuid,
    pub walk_distance_meters: f64,
}

/// Aggregate statistics over one stop-planning pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    pub stop_count: usize,
    pub assignment_count: usize,
    pub personal_stop_count: usize,
    pub avg_students_per_stop: f64,
    pub max_walk_distance_meters: f64,
}
