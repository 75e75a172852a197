//! Greedy maximum-coverage stop placement
//!
//! Seeds the candidate pool with every unassigned student's own coordinate,
//! then repeatedly materializes the candidate covering the most unassigned
//! students within the walk radius. Students left in regions too sparse for
//! any candidate to cover anyone else get a dedicated personal stop at
//! distance 0, so a successful pass covers everyone.
//!
//! Road snapping and reverse-geocoded labels come from the mapping
//! collaborator when one is supplied; both calls are best-effort and fall
//! back to the raw coordinate / a generated label.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::geo;
use crate::services::mapping::MappingService;
use crate::types::{Assignment, Coordinates, CoverageStats, Stop, StudentLocation};

/// Stop planner configuration
#[derive(Debug, Clone)]
pub struct StopPlannerConfig {
    /// Maximum acceptable walking distance in meters (R_walk)
    pub walk_radius_m: f64,
    /// Maximum students per stop (S_max)
    pub max_students_per_stop: usize,
    /// Optional cap on the number of stops produced by the greedy loop
    pub max_stops: Option<usize>,
}

impl Default for StopPlannerConfig {
    fn default() -> Self {
        Self {
            walk_radius_m: crate::defaults::DEFAULT_WALK_RADIUS_M,
            max_students_per_stop: crate::defaults::DEFAULT_MAX_STUDENTS_PER_STOP,
            max_stops: None,
        }
    }
}

/// Result of one stop-planning pass
#[derive(Debug, Clone, Default)]
pub struct PlannedStops {
    pub stops: Vec<Stop>,
    pub assignments: Vec<Assignment>,
    /// Students the greedy loop could not place before hitting the
    /// stop-count cap (always empty when no cap is set)
    pub unassigned_students: Vec<Uuid>,
    pub stats: CoverageStats,
}

pub struct StopPlanner {
    config: StopPlannerConfig,
}

struct Candidate {
    coordinates: Coordinates,
}

impl StopPlanner {
    pub fn new(config: StopPlannerConfig) -> Self {
        Self { config }
    }

    /// Plan stops for a set of students (the whole run, or one cluster).
    ///
    /// `mapper` is optional; without it stops keep their raw coordinates
    /// and generated labels.
    pub async fn plan(
        &self,
        students: &[StudentLocation],
        mapper: Option<&dyn MappingService>,
    ) -> PlannedStops {
        let mut remaining: Vec<&StudentLocation> =
            students.iter().filter(|s| s.is_placeable()).collect();

        let skipped = students.len() - remaining.len();
        if skipped > 0 {
            warn!("Stop planning: skipping {} students with unusable coordinates", skipped);
        }

        let mut result = PlannedStops::default();
        if remaining.is_empty() {
            return result;
        }

        let mut candidates: Vec<Candidate> = remaining
            .iter()
            .map(|s| Candidate { coordinates: s.coordinates() })
            .collect();

        while !remaining.is_empty() {
            if let Some(cap) = self.config.max_stops {
                if result.stops.len() >= cap {
                    warn!(
                        "Stop cap {} reached with {} students unassigned",
                        cap,
                        remaining.len()
                    );
                    result.unassigned_students = remaining.iter().map(|s| s.id).collect();
                    break;
                }
            }

            // Coverage set per candidate: unassigned students within the
            // walk radius, nearest first. Ties on size resolve to the
            // first-encountered candidate.
            let mut best_candidate = 0;
            let mut best_coverage: Vec<(usize, f64)> = vec![];
            for (ci, candidate) in candidates.iter().enumerate() {
                let mut coverage: Vec<(usize, f64)> = remaining
                    .iter()
                    .enumerate()
                    .filter_map(|(si, s)| {
                        let d = geo::distance_meters(&s.coordinates(), &candidate.coordinates);
                        (d <= self.config.walk_radius_m).then_some((si, d))
                    })
                    .collect();
                coverage.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

                if coverage.len() > best_coverage.len() {
                    best_candidate = ci;
                    best_coverage = coverage;
                }
            }

            if best_coverage.is_empty() {
                // No remaining candidate covers any remaining student
                // (their own candidates were consumed by earlier stops).
                // Give every remaining student a personal stop at distance 0.
                debug!("Creating {} personal stops for isolated students", remaining.len());
                for student in &remaining {
                    let stop = self
                        .materialize_stop(student.coordinates(), 1, result.stops.len(), mapper)
                        .await;
                    result.assignments.push(Assignment {
                        student_id: student.id,
                        stop_id: stop.id,
                        walk_distance_meters: 0.0,
                    });
                    result.stats.personal_stop_count += 1;
                    result.stops.push(stop);
                }
                remaining.clear();
                break;
            }

            let taken: Vec<(usize, f64)> = best_coverage
                .into_iter()
                .take(self.config.max_students_per_stop)
                .collect();

            let stop = self
                .materialize_stop(
                    candidates[best_candidate].coordinates,
                    taken.len() as u32,
                    result.stops.len(),
                    mapper,
                )
                .await;

            for (si, distance) in &taken {
                result.assignments.push(Assignment {
                    student_id: remaining[*si].id,
                    stop_id: stop.id,
                    walk_distance_meters: *distance,
                });
            }
            result.stops.push(stop);

            // Remove assigned students (descending index so removals don't
            // shift pending indices) and the consumed candidate
            let mut taken_indices: Vec<usize> = taken.iter().map(|(si, _)| *si).collect();
            taken_indices.sort_unstable_by(|a, b| b.cmp(a));
            for si in taken_indices {
                remaining.remove(si);
            }
            candidates.remove(best_candidate);
        }

        finalize_stats(&mut result);
        result
    }

    /// Create a stop at the candidate coordinate: best-effort road snap,
    /// best-effort reverse-geocoded label, tolerant of both failing.
    async fn materialize_stop(
        &self,
        candidate: Coordinates,
        occupancy: u32,
        ordinal: usize,
        mapper: Option<&dyn MappingService>,
    ) -> Stop {
        let mut coordinates = candidate;
        let mut address = None;

        if let Some(mapper) = mapper {
            match mapper.snap_to_road(candidate).await {
                Ok(snapped) => coordinates = snapped,
                Err(e) => debug!("Road snap failed, keeping raw coordinate: {}", e),
            }
            match mapper.reverse_geocode(coordinates).await {
                Ok(resolved) => address = resolved,
                Err(e) => debug!("Reverse geocode failed, using generated label: {}", e),
            }
        }

        let label = match &address {
            Some(addr) => addr.clone(),
            None => format!("Stop {}", ordinal + 1),
        };

        Stop {
            id: Uuid::new_v4(),
            label,
            lat: coordinates.lat,
            lng: coordinates.lng,
            address,
            occupancy,
            created_at: Utc::now(),
        }
    }
}

fn finalize_stats(result: &mut PlannedStops) {
    result.stats.stop_count = result.stops.len();
    result.stats.assignment_count = result.assignments.len();
    result.stats.avg_students_per_stop = if result.stops.is_empty() {
        0.0
    } else {
        result.assignments.len() as f64 / result.stops.len() as f64
    };
    result.stats.max_walk_distance_meters = result
        .assignments
        .iter()
        .map(|a| a.walk_distance_meters)
        .fold(0.0, f64::max);
}
