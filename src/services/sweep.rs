//! Capacitated sweep assignment of demand-bearing stops into routes
//!
//! Classic Gillett–Miller construction: order nodes by compass bearing
//! around the depot, then partition the sweep sequentially whenever the
//! accumulated demand would exceed vehicle capacity. Stops whose demand
//! alone exceeds capacity are first split into capacity-sized virtual
//! nodes so every node fits on some vehicle.

use tracing::debug;
use uuid::Uuid;

use crate::error::PlanningError;
use crate::services::geo;
use crate::types::{Coordinates, RouteNode};

/// A stop with its aggregated ridership, as input to the sweep
#[derive(Debug, Clone)]
pub struct DemandStop {
    pub stop_id: Uuid,
    pub coordinates: Coordinates,
    pub demand: u32,
}

/// Split a stop whose demand exceeds vehicle capacity into virtual nodes.
///
/// Produces ceil(demand / capacity) nodes carrying ceil(demand / nodeCount)
/// each, except the last, which absorbs the remainder so the node demands
/// sum exactly to the stop's demand. A stop that already fits comes back as
/// a single real node. `capacity` must be positive; [`sweep`] rejects zero
/// capacity before splitting.
pub fn split_virtual_nodes(stop: &DemandStop, capacity: u32) -> Vec<RouteNode> {
    if stop.demand <= capacity {
        return vec![RouteNode {
            stop_id: stop.stop_id,
            lat: stop.coordinates.lat,
            lng: stop.coordinates.lng,
            demand: stop.demand,
            virtual_index: None,
        }];
    }

    let node_count = (stop.demand + capacity - 1) / capacity;
    let per_node = (stop.demand + node_count - 1) / node_count;
    let mut nodes = Vec::with_capacity(node_count as usize);

    for i in 0..node_count {
        let demand = if i + 1 == node_count {
            stop.demand - per_node * (node_count - 1)
        } else {
            per_node
        };
        nodes.push(RouteNode {
            stop_id: stop.stop_id,
            lat: stop.coordinates.lat,
            lng: stop.coordinates.lng,
            demand,
            virtual_index: Some(i),
        });
    }

    nodes
}

/// Partition stops into routes by angular sweep around the depot.
///
/// Returns per-route node lists in angular order, not yet
/// travel-optimized; the sequencer handles that. Every route's total
/// demand is at most `capacity`.
pub fn sweep(
    stops: &[DemandStop],
    depot: &Coordinates,
    capacity: u32,
) -> Result<Vec<Vec<RouteNode>>, PlanningError> {
    let total_demand: u32 = stops.iter().map(|s| s.demand).sum();
    if total_demand == 0 {
        return Ok(vec![]);
    }
    if capacity == 0 {
        return Err(PlanningError::CapacityUnsatisfiable {
            capacity,
            demand: total_demand,
        });
    }

    let mut nodes: Vec<(f64, f64, RouteNode)> = stops
        .iter()
        .filter(|s| s.demand > 0)
        .flat_map(|s| split_virtual_nodes(s, capacity))
        .map(|node| {
            let coords = node.coordinates();
            (
                geo::bearing_degrees(depot, &coords),
                geo::distance_meters(depot, &coords),
                node,
            )
        })
        .collect();

    // Ascending bearing over [0°, 360°); equal bearings tie-break on
    // distance so output is stable
    nodes.sort_by(|a, b| {
        (a.0, a.1)
            .partial_cmp(&(b.0, b.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut routes: Vec<Vec<RouteNode>> = vec![];
    let mut current: Vec<RouteNode> = vec![];
    let mut current_demand: u32 = 0;

    for (_, _, node) in nodes {
        if current_demand + node.demand > capacity && !current.is_empty() {
            routes.push(std::mem::take(&mut current));
            current_demand = 0;
        }
        current_demand += node.demand;
        current.push(node);
    }
    if !current.is_empty() {
        routes.push(current);
    }

    debug!(
        "Sweep packed {} demand into {} routes (capacity {})",
        total_demand,
        routes.len(),
        capacity
    );
    Ok(routes)
}
