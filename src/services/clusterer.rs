//! Capacity-constrained K-Means clustering of student locations
//!
//! Partitions students into geographically coherent groups sized for one
//! vehicle each. Plain K-Means first (random bounding-box init, nearest
//! centroid assignment, mean recompute), then a rebalancing pass that moves
//! members out of over-capacity clusters into the smallest cluster until
//! every cluster fits.
//!
//! Output is non-deterministic unless a seed is supplied; seeded runs are
//! bit-identical, which the tests rely on.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::services::geo;
use crate::types::{Cluster, Coordinates, StudentLocation};

/// Clusterer configuration
#[derive(Debug, Clone)]
pub struct ClustererConfig {
    /// Desired cluster count; if <= 0, derived as ceil(students / capacity)
    pub cluster_count: i32,
    /// Maximum members per cluster (vehicle capacity)
    pub capacity: usize,
    pub max_iterations: u32,
    /// Convergence: every centroid moved less than this many meters
    pub convergence_threshold_m: f64,
    /// Maximum rebalancing iterations after convergence
    pub rebalance_budget: u32,
    /// Seed for centroid initialization; None uses entropy
    pub seed: Option<u64>,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            cluster_count: 0,
            capacity: crate::defaults::DEFAULT_VEHICLE_CAPACITY as usize,
            max_iterations: crate::defaults::DEFAULT_KMEANS_MAX_ITERATIONS,
            convergence_threshold_m: crate::defaults::DEFAULT_CONVERGENCE_THRESHOLD_M,
            rebalance_budget: crate::defaults::DEFAULT_REBALANCE_BUDGET,
            seed: None,
        }
    }
}

pub struct Clusterer {
    config: ClustererConfig,
}

impl Clusterer {
    pub fn new(config: ClustererConfig) -> Self {
        Self { config }
    }

    /// Partition students into clusters.
    ///
    /// Students with non-numeric coordinates are skipped with a warning and
    /// never assigned to any cluster. Zero placeable students yields an
    /// empty list.
    pub fn cluster(&self, students: &[StudentLocation]) -> Vec<Cluster> {
        let placeable: Vec<&StudentLocation> =
            students.iter().filter(|s| s.is_placeable()).collect();

        let skipped = students.len() - placeable.len();
        if skipped > 0 {
            warn!("Skipping {} students with unusable coordinates", skipped);
        }

        if placeable.is_empty() {
            return vec![];
        }

        let capacity = self.config.capacity.max(1);
        let k = if self.config.cluster_count <= 0 {
            (placeable.len() + capacity - 1) / capacity
        } else {
            self.config.cluster_count as usize
        };
        let k = k.clamp(1, placeable.len());

        let mut centroids = self.initial_centroids(&placeable, k);
        let mut membership: Vec<usize> = vec![0; placeable.len()];

        for iteration in 0..self.config.max_iterations {
            // Assign each student to its nearest centroid
            for (i, student) in placeable.iter().enumerate() {
                membership[i] = nearest_centroid(&student.coordinates(), &centroids);
            }

            // Recompute each non-empty cluster's centroid as the member mean
            let mut max_movement: f64 = 0.0;
            for (c, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<&&StudentLocation> = placeable
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| membership[*i] == c)
                    .map(|(_, s)| s)
                    .collect();
                if members.is_empty() {
                    continue;
                }
                let mean = Coordinates {
                    lat: members.iter().map(|s| s.lat).sum::<f64>() / members.len() as f64,
                    lng: members.iter().map(|s| s.lng).sum::<f64>() / members.len() as f64,
                };
                max_movement = max_movement.max(geo::distance_meters(centroid, &mean));
                *centroid = mean;
            }

            if max_movement < self.config.convergence_threshold_m {
                debug!("K-Means converged after {} iterations", iteration + 1);
                break;
            }
            if iteration + 1 == self.config.max_iterations {
                // Quality signal only; the best-so-far partition is kept
                warn!(
                    "K-Means did not converge within {} iterations (last movement {:.1} m)",
                    self.config.max_iterations, max_movement
                );
            }
        }

        let mut clusters = collect_clusters(&placeable, &membership, &centroids, capacity);
        self.rebalance(&mut clusters);

        // Drop clusters emptied by assignment or rebalancing, renumber
        clusters.retain(|c| !c.is_empty());
        for (id, cluster) in clusters.iter_mut().enumerate() {
            cluster.id = id;
        }
        clusters
    }

    fn initial_centroids(&self, students: &[&StudentLocation], k: usize) -> Vec<Coordinates> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;
        for s in students {
            min_lat = min_lat.min(s.lat);
            max_lat = max_lat.max(s.lat);
            min_lng = min_lng.min(s.lng);
            max_lng = max_lng.max(s.lng);
        }

        (0..k)
            .map(|_| Coordinates {
                // gen_range panics on an empty range; a single student
                // collapses the box to a point
                lat: if max_lat > min_lat { rng.gen_range(min_lat..max_lat) } else { min_lat },
                lng: if max_lng > min_lng { rng.gen_range(min_lng..max_lng) } else { min_lng },
            })
            .collect()
    }

    /// Move members from the largest cluster to the smallest until no
    /// cluster exceeds capacity or the iteration budget runs out.
    fn rebalance(&self, clusters: &mut [Cluster]) {
        if clusters.len() < 2 {
            return;
        }

        let mut budget = self.config.rebalance_budget;
        while budget > 0 && clusters.iter().any(|c| c.is_over_capacity()) {
            budget -= 1;

            let largest = clusters
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| c.len())
                .map(|(i, _)| i)
                .unwrap_or(0);
            let smallest = clusters
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.len())
                .map(|(i, _)| i)
                .unwrap_or(0);
            if largest == smallest || !clusters[largest].is_over_capacity() {
                break;
            }

            let excess = clusters[largest].len() - clusters[largest].capacity;
            let target_centroid = clusters[smallest].centroid;
            let source_centroid = clusters[largest].centroid;

            // Score = distance to target minus distance to source; the most
            // negative members sit closest to the target relative to home
            let mut scored: Vec<(usize, f64)> = clusters[largest]
                .students
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let coords = s.coordinates();
                    let score = geo::distance_meters(&coords, &target_centroid)
                        - geo::distance_meters(&coords, &source_centroid);
                    (i, score)
                })
                .collect();
            scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            // Index-tracked removal: collect indices first, remove in
            // descending order so earlier removals don't shift later ones
            let mut move_indices: Vec<usize> =
                scored.iter().take(excess).map(|(i, _)| *i).collect();
            move_indices.sort_unstable_by(|a, b| b.cmp(a));

            let mut moved = Vec::with_capacity(move_indices.len());
            for idx in move_indices {
                moved.push(clusters[largest].students.remove(idx));
            }
            debug!(
                "Rebalancing: moved {} students from cluster {} to cluster {}",
                moved.len(),
                largest,
                smallest
            );
            clusters[smallest].students.extend(moved);

            recompute_centroid(&mut clusters[largest]);
            recompute_centroid(&mut clusters[smallest]);
        }

        if clusters.iter().any(|c| c.is_over_capacity()) {
            warn!("Rebalancing budget exhausted with over-capacity clusters remaining");
        }
    }
}

fn nearest_centroid(point: &Coordinates, centroids: &[Coordinates]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = geo::distance_meters(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

fn collect_clusters(
    students: &[&StudentLocation],
    membership: &[usize],
    centroids: &[Coordinates],
    capacity: usize,
) -> Vec<Cluster> {
    centroids
        .iter()
        .enumerate()
        .map(|(c, centroid)| Cluster {
            id: c,
            centroid: *centroid,
            students: students
                .iter()
                .zip(membership)
                .filter(|(_, m)| **m == c)
                .map(|(s, _)| (*s).clone())
                .collect(),
            capacity,
        })
        .collect()
}

fn recompute_centroid(cluster: &mut Cluster) {
    if cluster.students.is_empty() {
        return;
    }
    let n = cluster.students.len() as f64;
    cluster.centroid = Coordinates {
        lat: cluster.students.iter().map(|s| s.lat).sum::<f64>() / n,
        lng: cluster.students.iter().map(|s| s.lng).sum::<f64>() / n,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn student(lat: f64, lng: f64) -> StudentLocation {
        StudentLocation {
            id: Uuid::new_v4(),
            lat,
            lng,
            home_address: String::new(),
            active: true,
        }
    }

    fn seeded(config: ClustererConfig) -> Clusterer {
        Clusterer::new(ClustererConfig { seed: Some(42), ..config })
    }

    /// ~50 students spread roughly uniformly over a ~6 km box
    fn uniform_students(count: usize) -> Vec<StudentLocation> {
        (0..count)
            .map(|i| {
                let row = (i / 7) as f64;
                let col = (i % 7) as f64;
                student(50.0 + row * 0.008, 14.0 + col * 0.008)
            })
            .collect()
    }

    #[test]
    fn test_zero_students_returns_empty() {
        let clusterer = seeded(ClustererConfig::default());
        assert!(clusterer.cluster(&[]).is_empty());
    }

    #[test]
    fn test_single_student_single_cluster() {
        let clusterer = seeded(ClustererConfig::default());
        let clusters = clusterer.cluster(&[student(50.0, 14.0)]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 1);
    }

    #[test]
    fn test_unplaceable_students_are_skipped() {
        let clusterer = seeded(ClustererConfig::default());
        let students = vec![
            student(50.0, 14.0),
            student(f64::NAN, 14.0),
            student(50.1, 14.1),
        ];
        let clusters = clusterer.cluster(&students);
        let total: usize = clusters.iter().map(|c| c.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_derived_cluster_count() {
        // 50 students / capacity 20 → K = 3
        let clusterer = seeded(ClustererConfig {
            cluster_count: 0,
            capacity: 20,
            ..ClustererConfig::default()
        });
        let clusters = clusterer.cluster(&uniform_students(50));
        assert!(!clusters.is_empty());
        assert!(clusters.len() <= 3);
        let total: usize = clusters.iter().map(|c| c.len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_two_distant_groups_form_two_clusters() {
        let mut students: Vec<StudentLocation> =
            (0..5).map(|i| student(50.0 + i as f64 * 0.001, 14.0)).collect();
        students.extend((0..5).map(|i| student(50.5 + i as f64 * 0.001, 14.5)));

        let clusterer = seeded(ClustererConfig {
            cluster_count: 2,
            capacity: 5,
            ..ClustererConfig::default()
        });
        let clusters = clusterer.cluster(&students);

        // Capacity 5 forces the 10 students into exactly two clusters of 5,
        // whatever the initial centroid draw looked like
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 5);
        assert_eq!(clusters[1].len(), 5);
    }

    #[test]
    fn test_rebalancing_caps_cluster_size() {
        // Scenario: 50 students roughly uniform, capacity 40, K = 2
        let clusterer = seeded(ClustererConfig {
            cluster_count: 2,
            capacity: 40,
            ..ClustererConfig::default()
        });
        let clusters = clusterer.cluster(&uniform_students(50));

        assert_eq!(clusters.len(), 2);
        for cluster in &clusters {
            assert!(cluster.len() <= 40, "cluster has {} members", cluster.len());
        }
        let total: usize = clusters.iter().map(|c| c.len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let students = uniform_students(30);
        let config = ClustererConfig {
            cluster_count: 3,
            capacity: 15,
            seed: Some(7),
            ..ClustererConfig::default()
        };

        let a = Clusterer::new(config.clone()).cluster(&students);
        let b = Clusterer::new(config).cluster(&students);

        assert_eq!(a.len(), b.len());
        for (ca, cb) in a.iter().zip(&b) {
            let ids_a: Vec<Uuid> = ca.students.iter().map(|s| s.id).collect();
            let ids_b: Vec<Uuid> = cb.students.iter().map(|s| s.id).collect();
            assert_eq!(ids_a, ids_b);
        }
    }

    #[test]
    fn test_no_student_in_two_clusters() {
        let students = uniform_students(40);
        let clusterer = seeded(ClustererConfig {
            cluster_count: 4,
            capacity: 12,
            ..ClustererConfig::default()
        });
        let clusters = clusterer.cluster(&students);

        let mut seen = std::collections::HashSet::new();
        for cluster in &clusters {
            for s in &cluster.students {
                assert!(seen.insert(s.id), "student assigned twice");
            }
        }
        assert_eq!(seen.len(), 40);
    }
}
