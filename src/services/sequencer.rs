//! Intra-route stop ordering
//!
//! Nearest-neighbor from the depot over a travel-time matrix from the
//! mapping collaborator. When that call fails or times out the same
//! nearest-neighbor shape runs over great-circle distance instead, so a
//! flaky backend degrades the tour quality, never the run. A delegated
//! strategy hands the whole ordering problem to the backend's
//! optimize-waypoints mode.

use tracing::{debug, warn};

use crate::services::geo;
use crate::services::mapping::{MappingService, TravelMatrix};
use crate::types::{Coordinates, Depot, RouteNode};

/// A route's nodes in visiting order with aggregate travel estimates
/// (depot→first leg + internal legs + last→depot leg)
#[derive(Debug, Clone)]
pub struct SequencedRoute {
    pub nodes: Vec<RouteNode>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
}

impl SequencedRoute {
    fn empty() -> Self {
        Self {
            nodes: vec![],
            total_distance_meters: 0.0,
            total_duration_seconds: 0.0,
        }
    }
}

pub struct Sequencer<'a> {
    mapper: &'a dyn MappingService,
}

impl<'a> Sequencer<'a> {
    pub fn new(mapper: &'a dyn MappingService) -> Self {
        Self { mapper }
    }

    /// Order one route's nodes, preferring the collaborator's travel-time
    /// matrix and degrading to great-circle distance on any failure.
    pub async fn sequence(&self, depot: &Depot, nodes: Vec<RouteNode>) -> SequencedRoute {
        if nodes.is_empty() {
            return SequencedRoute::empty();
        }

        let mut locations = Vec::with_capacity(nodes.len() + 1);
        locations.push(depot.coordinates());
        locations.extend(nodes.iter().map(|n| n.coordinates()));

        match self.mapper.travel_matrix(&locations, &locations).await {
            Ok(matrix) if matrix.rows == locations.len() => {
                let order = nearest_neighbor(nodes.len(), |from, to| {
                    matrix.duration(from, to) as f64
                });
                build_route(nodes, order, &MatrixCosts(&matrix))
            }
            Ok(matrix) => {
                warn!(
                    "Travel matrix has wrong shape ({}x{}), using great-circle fallback",
                    matrix.rows, matrix.cols
                );
                self.sequence_fallback(nodes, &locations)
            }
            Err(e) => {
                warn!("Travel matrix unavailable ({}), using great-circle fallback", e);
                self.sequence_fallback(nodes, &locations)
            }
        }
    }

    fn sequence_fallback(&self, nodes: Vec<RouteNode>, locations: &[Coordinates]) -> SequencedRoute {
        let order = nearest_neighbor(nodes.len(), |from, to| {
            geo::distance_meters(&locations[from], &locations[to])
        });
        build_route(nodes, order, &HaversineCosts(locations))
    }

    /// Delegate ordering to the collaborator's optimize-waypoints mode.
    ///
    /// An explicit returned permutation is adopted directly; otherwise the
    /// order is inferred by matching returned leg endpoints back to input
    /// coordinates within ~100 m, appending unmatched nodes at the end in
    /// original order. Any failure falls back to [`Self::sequence`]'s
    /// degraded path.
    pub async fn sequence_delegated(&self, depot: &Depot, nodes: Vec<RouteNode>) -> SequencedRoute {
        if nodes.is_empty() {
            return SequencedRoute::empty();
        }

        let waypoints: Vec<Coordinates> = nodes.iter().map(|n| n.coordinates()).collect();
        let directions = self
            .mapper
            .directions(depot.coordinates(), depot.coordinates(), &waypoints, true)
            .await;

        let directions = match directions {
            Ok(d) => d,
            Err(e) => {
                warn!("Waypoint optimization unavailable ({}), sequencing locally", e);
                let mut locations = Vec::with_capacity(nodes.len() + 1);
                locations.push(depot.coordinates());
                locations.extend(waypoints);
                return self.sequence_fallback(nodes, &locations);
            }
        };

        let order = match directions.waypoint_order.as_ref() {
            Some(order) if is_permutation(order, nodes.len()) => {
                debug!("Adopting backend waypoint order");
                order.clone()
            }
            _ => infer_order_from_legs(&directions.legs, &waypoints),
        };

        let total_distance_meters: f64 = directions
            .legs
            .iter()
            .map(|l| l.distance_meters as f64)
            .sum();
        let total_duration_seconds: f64 = directions
            .legs
            .iter()
            .map(|l| l.duration_seconds as f64)
            .sum();

        let nodes = apply_order(nodes, &order);
        SequencedRoute { nodes, total_distance_meters, total_duration_seconds }
    }
}

/// Nearest-neighbor over cost(from, to) where index 0 is the depot and
/// node i maps to index i + 1. Returns visiting order as node indices.
fn nearest_neighbor(node_count: usize, cost: impl Fn(usize, usize) -> f64) -> Vec<usize> {
    let mut order = Vec::with_capacity(node_count);
    let mut visited = vec![false; node_count];
    let mut current = 0usize; // depot

    while order.len() < node_count {
        let mut best_next = None;
        let mut best_cost = f64::MAX;

        for i in 0..node_count {
            if visited[i] {
                continue;
            }
            let c = cost(current, i + 1);
            if c < best_cost {
                best_cost = c;
                best_next = Some(i);
            }
        }

        match best_next {
            Some(next) => {
                order.push(next);
                visited[next] = true;
                current = next + 1;
            }
            None => break,
        }
    }

    order
}

trait LegCosts {
    /// Cost between matrix positions (0 = depot, i+1 = node i)
    fn leg(&self, from: usize, to: usize) -> (f64, f64);
}

struct MatrixCosts<'m>(&'m TravelMatrix);

impl LegCosts for MatrixCosts<'_> {
    fn leg(&self, from: usize, to: usize) -> (f64, f64) {
        (self.0.distance(from, to) as f64, self.0.duration(from, to) as f64)
    }
}

struct HaversineCosts<'c>(&'c [Coordinates]);

impl LegCosts for HaversineCosts<'_> {
    fn leg(&self, from: usize, to: usize) -> (f64, f64) {
        let meters = geo::distance_meters(&self.0[from], &self.0[to]);
        let seconds = meters / 1000.0 / crate::defaults::FALLBACK_SPEED_KMH * 3600.0;
        (meters, seconds)
    }
}

fn build_route(nodes: Vec<RouteNode>, order: Vec<usize>, costs: &dyn LegCosts) -> SequencedRoute {
    let mut total_distance_meters = 0.0;
    let mut total_duration_seconds = 0.0;

    let mut prev = 0usize; // depot
    for &i in &order {
        let (d, t) = costs.leg(prev, i + 1);
        total_distance_meters += d;
        total_duration_seconds += t;
        prev = i + 1;
    }
    // Return leg to the depot
    if let Some(&last) = order.last() {
        let (d, t) = costs.leg(last + 1, 0);
        total_distance_meters += d;
        total_duration_seconds += t;
    }

    SequencedRoute {
        nodes: apply_order(nodes, &order),
        total_distance_meters,
        total_duration_seconds,
    }
}

fn apply_order(nodes: Vec<RouteNode>, order: &[usize]) -> Vec<RouteNode> {
    let mut slots: Vec<Option<RouteNode>> = nodes.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for &i in order {
        if let Some(node) = slots.get_mut(i).and_then(Option::take) {
            ordered.push(node);
        }
    }
    // Anything the order missed keeps its original relative position
    for slot in slots {
        if let Some(node) = slot {
            ordered.push(node);
        }
    }
    ordered
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &i in order {
        if i >= len || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

/// Infer the visiting order from directions legs: each internal leg start
/// should coincide with one input waypoint within the match tolerance.
fn infer_order_from_legs(
    legs: &[crate::services::mapping::DirectionsLeg],
    waypoints: &[Coordinates],
) -> Vec<usize> {
    let tolerance = crate::defaults::LEG_MATCH_TOLERANCE_M;
    let mut order = Vec::new();
    let mut used = vec![false; waypoints.len()];

    // legs run depot → w, w → w, ..., w → depot; every leg end except the
    // final return should sit on a waypoint
    for leg in legs.iter().take(legs.len().saturating_sub(1)) {
        let mut best: Option<(usize, f64)> = None;
        for (i, wp) in waypoints.iter().enumerate() {
            if used[i] {
                continue;
            }
            let d = geo::distance_meters(&leg.end, wp);
            if d <= tolerance && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        if let Some((i, _)) = best {
            used[i] = true;
            order.push(i);
        }
    }

    if order.len() < waypoints.len() {
        debug!(
            "Leg matching placed {}/{} waypoints; appending the rest in input order",
            order.len(),
            waypoints.len()
        );
        for (i, u) in used.iter().enumerate() {
            if !u {
                order.push(i);
            }
        }
    }

    order
}
