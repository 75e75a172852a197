//! Route types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// A node visited by a vehicle route.
///
/// Normally one node is one stop carrying that stop's full demand. When a
/// stop's demand exceeds vehicle capacity it is split into several virtual
/// nodes, each a capacity-sized fragment with `virtual_index` set and a
/// back-reference to the origin stop via `stop_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNode {
    pub stop_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    /// Students boarding at this node
    pub demand: u32,
    /// Fragment number within the origin stop, when split
    pub virtual_index: Option<u32>,
}

impl RouteNode {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates { lat: self.lat, lng: self.lng }
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_index.is_some()
    }
}

/// A vehicle route: ordered visiting sequence of nodes, starting and ending
/// at the depot (the depot itself is not stored as a node).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Uuid,
    pub nodes: Vec<RouteNode>,
    pub total_demand: u32,
    /// Depot→first + internal legs + last→depot
    pub estimated_distance_meters: f64,
    pub estimated_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl Route {
    pub fn demand(&self) -> u32 {
        self.nodes.iter().map(|n| n.demand).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_demand_sums_nodes() {
        let node = |demand| RouteNode {
            stop_id: Uuid::new_v4(),
            lat: 50.0,
            lng: 14.0,
            demand,
            virtual_index: None,
        };
        let route = Route {
            id: Uuid::new_v4(),
            nodes: vec![node(10), node(15), node(5)],
            total_demand: 30,
            estimated_distance_meters: 0.0,
            estimated_time_seconds: 0.0,
            created_at: Utc::now(),
        };
        assert_eq!(route.demand(), 30);
    }

    #[test]
    fn test_virtual_node_flag() {
        let node = RouteNode {
            stop_id: Uuid::new_v4(),
            lat: 50.0,
            lng: 14.0,
            demand: 20,
            virtual_index: Some(1),
        };
        assert!(node.is_virtual());
    }
}
