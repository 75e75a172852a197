//! Geographic calculations
//!
//! The sole distance/angle primitives used by the pipeline. Every component
//! measures distance through `distance_meters` and angle through
//! `bearing_degrees` so behavior stays consistent across stages.

use crate::types::Coordinates;

/// Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate Haversine great-circle distance between two points in meters
pub fn distance_meters(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial compass bearing from one point toward another, in [0, 360)
pub fn bearing_degrees(from: &Coordinates, to: &Coordinates) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lng = (to.lng - from.lng).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();

    let degrees = y.atan2(x).to_degrees();
    (degrees + 360.0) % 360.0
}

/// Calculate distance matrix between all points, in meters
/// Returns a 2D vector where matrix[i][j] is distance from point i to point j
pub fn distance_matrix_meters(points: &[Coordinates]) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut matrix = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..n {
            if i != j {
                matrix[i][j] = distance_meters(&points[i], &points[j]);
            }
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_prague_brno() {
        let prague = Coordinates { lat: 50.0755, lng: 14.4378 };
        let brno = Coordinates { lat: 49.1951, lng: 16.6068 };

        let distance = distance_meters(&prague, &brno);

        // Prague to Brno is approximately 185 km
        assert!((distance - 185_000.0).abs() < 5_000.0);
    }

    #[test]
    fn test_distance_same_point() {
        let point = Coordinates { lat: 50.0, lng: 14.0 };
        let distance = distance_meters(&point, &point);
        assert!(distance.abs() < 0.001);
    }

    #[test]
    fn test_bearing_due_north() {
        let from = Coordinates { lat: 50.0, lng: 14.0 };
        let to = Coordinates { lat: 51.0, lng: 14.0 };
        let bearing = bearing_degrees(&from, &to);
        assert!(bearing.abs() < 0.01);
    }

    #[test]
    fn test_bearing_due_east_at_equator() {
        let from = Coordinates { lat: 0.0, lng: 0.0 };
        let to = Coordinates { lat: 0.0, lng: 1.0 };
        let bearing = bearing_degrees(&from, &to);
        assert!((bearing - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_bearing_due_south() {
        let from = Coordinates { lat: 50.0, lng: 14.0 };
        let to = Coordinates { lat: 49.0, lng: 14.0 };
        let bearing = bearing_degrees(&from, &to);
        assert!((bearing - 180.0).abs() < 0.01);
    }

    #[test]
    fn test_bearing_is_normalized() {
        let from = Coordinates { lat: 0.0, lng: 0.0 };
        let to = Coordinates { lat: 0.0, lng: -1.0 };
        let bearing = bearing_degrees(&from, &to);
        // Due west comes back as 270, never -90
        assert!((bearing - 270.0).abs() < 0.01);
    }

    #[test]
    fn test_distance_matrix() {
        let points = vec![
            Coordinates { lat: 50.0, lng: 14.0 },
            Coordinates { lat: 50.1, lng: 14.1 },
            Coordinates { lat: 50.2, lng: 14.2 },
        ];

        let matrix = distance_matrix_meters(&points);

        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix[0].len(), 3);

        // Diagonal should be zero
        assert!(matrix[0][0].abs() < 0.001);
        assert!(matrix[1][1].abs() < 0.001);
        assert!(matrix[2][2].abs() < 0.001);

        // Should be symmetric
        assert!((matrix[0][1] - matrix[1][0]).abs() < 0.001);
    }
}
