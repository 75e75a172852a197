//! Transient clustering types
//!
//! Clusters exist only during the clustering phase of a run and are
//! discarded once students have been assigned to stops.

use serde::Serialize;

use super::{Coordinates, StudentLocation};

/// A geographically coherent group of students produced by the clusterer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Position in the clusterer's output list
    pub id: usize,
    pub centroid: Coordinates,
    pub students: Vec<StudentLocation>,
    /// Maximum member count this cluster should hold (vehicle capacity)
    pub capacity: usize,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn is_over_capacity(&self) -> bool {
        self.students.len() > self.capacity
    }
}
