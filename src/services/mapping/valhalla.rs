//! Valhalla routing engine client
//!
//! Covers the routing half of the mapping collaborator: travel matrices
//! (`/sources_to_targets`), turn-free directions with optional waypoint
//! optimization (`/route`, `/optimized_route`) and road snapping
//! (`/locate`).
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/matrix/api-reference/

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Coordinates;
use super::{DirectionsLeg, DirectionsResult, TravelMatrix};

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Valhalla routing client
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn locations(coords: &[Coordinates]) -> Vec<ValhallaLocation> {
        coords
            .iter()
            .map(|c| ValhallaLocation {
                lat: c.lat,
                lon: c.lng,
                // 500m radius – geocoded stop candidates may sit on a
                // building centroid rather than the road edge
                radius: Some(500),
            })
            .collect()
    }

    /// Rectangular distance/duration matrix between origins and destinations
    pub async fn travel_matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<TravelMatrix> {
        let rows = origins.len();
        let cols = destinations.len();

        if rows == 0 || cols == 0 {
            return Ok(TravelMatrix::empty());
        }

        let request = MatrixRequest {
            sources: Self::locations(origins),
            targets: Self::locations(destinations),
            costing: "bus".to_string(),
            units: "kilometers".to_string(),
        };
        let url = format!("{}/sources_to_targets", self.config.base_url);

        debug!("Requesting {}x{} travel matrix from Valhalla", rows, cols);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send matrix request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla matrix returned error {}: {}", status, body);
        }

        let matrix_response: MatrixResponse = response
            .json()
            .await
            .context("Failed to parse Valhalla matrix response")?;

        let mut distances = vec![vec![0u64; cols]; rows];
        let mut durations = vec![vec![0u64; cols]; rows];

        for (i, row) in matrix_response.sources_to_targets.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                // Convert km to meters
                distances[i][j] = cell.distance
                    .map(|d| (d * 1000.0) as u64)
                    .unwrap_or_else(|| {
                        warn!("No distance for leg {} -> {}", i, j);
                        u64::MAX / 2 // Very large but won't overflow
                    });

                // Time is already in seconds
                durations[i][j] = cell.time
                    .map(|t| t as u64)
                    .unwrap_or_else(|| {
                        warn!("No duration for leg {} -> {}", i, j);
                        u64::MAX / 2
                    });
            }
        }

        Ok(TravelMatrix { distances, durations, rows, cols })
    }

    /// Snap a coordinate to the nearest road edge via `/locate`
    pub async fn snap_to_road(&self, coordinates: Coordinates) -> Result<Coordinates> {
        let request = LocateRequest {
            locations: Self::locations(&[coordinates]),
            costing: "bus".to_string(),
            verbose: false,
        };
        let url = format!("{}/locate", self.config.base_url);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send locate request to Valhalla")?;

        if !response.status().is_success() {
            anyhow::bail!("Valhalla locate returned status {}", response.status());
        }

        let results: Vec<LocateResult> = response
            .json()
            .await
            .context("Failed to parse Valhalla locate response")?;

        let snapped = results
            .first()
            .and_then(|r| r.edges.as_ref())
            .and_then(|edges| edges.first())
            .map(|e| Coordinates { lat: e.correlated_lat, lng: e.correlated_lon });

        match snapped {
            Some(c) => Ok(c),
            None => anyhow::bail!("Valhalla locate found no road edge near the coordinate"),
        }
    }

    /// Directions through the given waypoints. With `optimize_waypoints` the
    /// `/optimized_route` endpoint is used and the returned permutation of
    /// the input order is reported in `waypoint_order`.
    pub async fn directions(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        optimize_waypoints: bool,
    ) -> Result<DirectionsResult> {
        let mut all = Vec::with_capacity(waypoints.len() + 2);
        all.push(origin);
        all.extend_from_slice(waypoints);
        all.push(destination);

        let request = RouteRequest {
            locations: Self::locations(&all),
            costing: "bus".to_string(),
            directions_type: "none".to_string(), // geometry only, no turn-by-turn
        };

        let endpoint = if optimize_waypoints { "optimized_route" } else { "route" };
        let url = format!("{}/{}", self.config.base_url, endpoint);

        debug!("Requesting {} from Valhalla for {} locations", endpoint, all.len());

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send route request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla {} returned error {}: {}", endpoint, status, body);
        }

        let route_response: RouteResponse = response
            .json()
            .await
            .context("Failed to parse Valhalla route response")?;

        // Extract and concatenate geometry from ALL legs, collecting one
        // summary leg per Valhalla leg as we go
        let mut geometry: Vec<[f64; 2]> = Vec::new();
        let mut legs = Vec::with_capacity(route_response.trip.legs.len());

        for (i, leg) in route_response.trip.legs.iter().enumerate() {
            let leg_coords = decode_polyline(&leg.shape, 6)?;
            if leg_coords.is_empty() {
                warn!("Valhalla leg {} has no shape points", i);
                continue;
            }

            let first = leg_coords[0];
            let last = leg_coords[leg_coords.len() - 1];
            legs.push(DirectionsLeg {
                start: Coordinates { lat: first[1], lng: first[0] },
                end: Coordinates { lat: last[1], lng: last[0] },
                distance_meters: (leg.summary.length * 1000.0) as u64,
                duration_seconds: leg.summary.time as u64,
            });

            // Skip the first point of subsequent legs (it's the same as last point of previous leg)
            if i == 0 {
                geometry.extend(leg_coords);
            } else {
                geometry.extend(leg_coords.into_iter().skip(1));
            }
        }

        // The optimized endpoint reports where each input location landed in
        // the visiting order; translate to waypoint positions (drop the fixed
        // origin/destination ends)
        let waypoint_order = if optimize_waypoints {
            route_response.trip.locations.as_ref().map(|locs| {
                let mut order: Vec<usize> = Vec::new();
                for loc in locs {
                    if let Some(idx) = loc.original_index {
                        let idx = idx as usize;
                        if idx >= 1 && idx <= waypoints.len() {
                            order.push(idx - 1);
                        }
                    }
                }
                order
            })
        } else {
            None
        };

        Ok(DirectionsResult { geometry, legs, waypoint_order })
    }
}

// Valhalla API types

#[derive(Debug, Serialize)]
struct MatrixRequest {
    sources: Vec<ValhallaLocation>,
    targets: Vec<ValhallaLocation>,
    costing: String,
    units: String,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Distance in kilometers (when units="kilometers")
    distance: Option<f64>,
    /// Time in seconds
    time: Option<f64>,
}

#[derive(Debug, Serialize)]
struct LocateRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct LocateResult {
    edges: Option<Vec<LocateEdge>>,
}

#[derive(Debug, Deserialize)]
struct LocateEdge {
    correlated_lat: f64,
    correlated_lon: f64,
}

#[derive(Debug, Serialize)]
struct RouteRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    directions_type: String,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    legs: Vec<Leg>,
    /// Present on /optimized_route responses
    locations: Option<Vec<TripLocation>>,
}

#[derive(Debug, Deserialize)]
struct TripLocation {
    original_index: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    /// Encoded polyline shape
    shape: String,
    summary: LegSummary,
}

#[derive(Debug, Deserialize)]
struct LegSummary {
    /// Leg length in kilometers
    length: f64,
    /// Leg time in seconds
    time: f64,
}

/// Decode Valhalla's encoded polyline format
/// Precision is 6 decimal places for Valhalla (vs 5 for Google)
fn decode_polyline(encoded: &str, precision: u32) -> Result<Vec<[f64; 2]>> {
    let factor = 10_f64.powi(precision as i32);
    let mut coordinates = Vec::new();
    let mut lat = 0i64;
    let mut lng = 0i64;

    let bytes = encoded.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // Decode latitude
        let mut shift = 0;
        let mut result = 0i64;
        loop {
            if i >= bytes.len() {
                anyhow::bail!("Invalid polyline encoding");
            }
            let byte = bytes[i] as i64 - 63;
            i += 1;
            result |= (byte & 0x1f) << shift;
            shift += 5;
            if byte < 0x20 {
                break;
            }
        }
        let dlat = if result & 1 != 0 {
            !(result >> 1)
        } else {
            result >> 1
        };
        lat += dlat;

        // Decode longitude
        shift = 0;
        result = 0;
        loop {
            if i >= bytes.len() {
                anyhow::bail!("Invalid polyline encoding");
            }
            let byte = bytes[i] as i64 - 63;
            i += 1;
            result |= (byte & 0x1f) << shift;
            shift += 5;
            if byte < 0x20 {
                break;
            }
        }
        let dlng = if result & 1 != 0 {
            !(result >> 1)
        } else {
            result >> 1
        };
        lng += dlng;

        // GeoJSON uses [lng, lat] order
        coordinates.push([lng as f64 / factor, lat as f64 / factor]);
    }

    Ok(coordinates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valhalla_config_default() {
        let config = ValhallaConfig::default();
        assert_eq!(config.base_url, "http://localhost:8002");
        assert_eq!(config.timeout_seconds, 30);
    }

    #[test]
    fn test_valhalla_config_custom() {
        let config = ValhallaConfig::new("http://valhalla:8002");
        assert_eq!(config.base_url, "http://valhalla:8002");
    }

    #[test]
    fn test_locations_keep_coordinates() {
        let locs = ValhallaClient::locations(&[
            Coordinates { lat: 50.0755, lng: 14.4378 },
            Coordinates { lat: 49.1951, lng: 16.6068 },
        ]);

        assert_eq!(locs.len(), 2);
        assert!((locs[0].lat - 50.0755).abs() < 0.0001);
        assert!((locs[0].lon - 14.4378).abs() < 0.0001);
        assert_eq!(locs[0].radius, Some(500));
    }

    #[test]
    fn test_decode_polyline_empty() {
        let coords = decode_polyline("", 6).unwrap();
        assert!(coords.is_empty());
    }

    #[test]
    fn test_decode_polyline_invalid_truncated() {
        // A continuation byte with nothing after it
        let result = decode_polyline("_", 6);
        assert!(result.is_err());
    }

    // Integration tests require a running Valhalla server

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn test_valhalla_matrix_prague_brno() {
        let client = ValhallaClient::new(ValhallaConfig::new("http://localhost:8002"));

        let locations = vec![
            Coordinates { lat: 50.0755, lng: 14.4378 }, // Prague
            Coordinates { lat: 49.1951, lng: 16.6068 }, // Brno
        ];

        let matrix = client.travel_matrix(&locations, &locations).await.unwrap();

        assert_eq!(matrix.rows, 2);

        // Prague to Brno is ~205 km by road
        let distance_km = matrix.distance(0, 1) as f64 / 1000.0;
        assert!(distance_km > 190.0 && distance_km < 230.0,
            "Expected ~205 km, got {} km", distance_km);
    }

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn test_valhalla_directions_geometry() {
        let client = ValhallaClient::new(ValhallaConfig::new("http://localhost:8002"));

        let result = client
            .directions(
                Coordinates { lat: 50.0755, lng: 14.4378 },
                Coordinates { lat: 49.1951, lng: 16.6068 },
                &[],
                false,
            )
            .await
            .unwrap();

        assert!(result.geometry.len() > 10,
            "Expected many route points, got {}", result.geometry.len());
        assert_eq!(result.legs.len(), 1);
        assert!(result.waypoint_order.is_none());
    }
}
