//! Mapping collaborator boundary
//!
//! One trait covers everything the pipeline asks of the external mapping
//! backend: geocoding, reverse geocoding, road snapping, travel matrices
//! and directions. Production composes Nominatim + Valhalla behind it; the
//! mock backend is deterministic and network-free for tests and offline
//! runs. The core never assumes a call succeeds: every call site has a
//! documented degraded-mode fallback.

mod cache;
mod guard;
mod nominatim;
mod valhalla;

pub use cache::{CacheTtls, CachedMapping};
pub use guard::{CallGuard, CircuitBreaker, RateLimiter};
pub use nominatim::NominatimClient;
pub use valhalla::{ValhallaClient, ValhallaConfig};

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::services::geo;
use crate::types::Coordinates;

/// One geocoding candidate
#[derive(Debug, Clone)]
pub struct GeocodeHit {
    pub coordinates: Coordinates,
    pub formatted_address: String,
}

/// Rectangular travel matrix between origins (rows) and destinations (cols)
#[derive(Debug, Clone)]
pub struct TravelMatrix {
    /// Distance in meters [i][j] from origin i to destination j
    pub distances: Vec<Vec<u64>>,
    /// Duration in seconds [i][j] from origin i to destination j
    pub durations: Vec<Vec<u64>>,
    pub rows: usize,
    pub cols: usize,
}

impl TravelMatrix {
    pub fn empty() -> Self {
        Self {
            distances: vec![],
            durations: vec![],
            rows: 0,
            cols: 0,
        }
    }

    /// Distance from origin i to destination j in meters
    pub fn distance(&self, from: usize, to: usize) -> u64 {
        self.distances[from][to]
    }

    /// Duration from origin i to destination j in seconds
    pub fn duration(&self, from: usize, to: usize) -> u64 {
        self.durations[from][to]
    }
}

/// One leg of a directions response
#[derive(Debug, Clone)]
pub struct DirectionsLeg {
    pub start: Coordinates,
    pub end: Coordinates,
    pub distance_meters: u64,
    pub duration_seconds: u64,
}

/// Directions through a set of waypoints
#[derive(Debug, Clone)]
pub struct DirectionsResult {
    /// Route polyline as [lng, lat] pairs (GeoJSON order)
    pub geometry: Vec<[f64; 2]>,
    pub legs: Vec<DirectionsLeg>,
    /// Permutation of the input waypoints, when the backend optimized the
    /// visiting order and reported it explicitly
    pub waypoint_order: Option<Vec<usize>>,
}

/// Mapping collaborator abstraction.
///
/// The core supplies only coordinates and mode flags; API keys, quota
/// bookkeeping and cache policy live on the other side of this trait.
#[async_trait]
pub trait MappingService: Send + Sync {
    /// Geocode a free-form address to candidate coordinates
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeHit>>;

    /// Resolve coordinates to a display address
    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Option<String>>;

    /// Snap a coordinate to the nearest road (best effort)
    async fn snap_to_road(&self, coordinates: Coordinates) -> Result<Coordinates>;

    /// Travel matrix between origins and destinations
    async fn travel_matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<TravelMatrix>;

    /// Directions origin → waypoints → destination, optionally letting the
    /// backend optimize the waypoint visiting order
    async fn directions(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        optimize_waypoints: bool,
    ) -> Result<DirectionsResult>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

// ==========================================================================
// Production backend: Nominatim + Valhalla behind call guards
// ==========================================================================

/// Nominatim allows 1 req/s; stay comfortably under it
const GEOCODE_MIN_INTERVAL_MS: u64 = 1500;
/// Self-hosted Valhalla tolerates a much higher rate
const ROUTING_MIN_INTERVAL_MS: u64 = 100;
const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_RECOVERY_SECS: u64 = 300;

/// OSM-stack mapping backend: Nominatim for (reverse) geocoding, Valhalla
/// for snapping, matrices and directions. Each endpoint family is guarded
/// by a rate limiter and a circuit breaker.
pub struct OsmMapping {
    nominatim: NominatimClient,
    valhalla: ValhallaClient,
    geocode_guard: CallGuard,
    routing_guard: CallGuard,
}

impl OsmMapping {
    pub fn new(nominatim_url: &str, valhalla: ValhallaConfig) -> Self {
        Self {
            nominatim: NominatimClient::new(nominatim_url, 10),
            valhalla: ValhallaClient::new(valhalla),
            geocode_guard: CallGuard::new(
                Duration::from_millis(GEOCODE_MIN_INTERVAL_MS),
                BREAKER_THRESHOLD,
                Duration::from_secs(BREAKER_RECOVERY_SECS),
            ),
            routing_guard: CallGuard::new(
                Duration::from_millis(ROUTING_MIN_INTERVAL_MS),
                BREAKER_THRESHOLD,
                Duration::from_secs(BREAKER_RECOVERY_SECS),
            ),
        }
    }

    async fn guarded<T>(
        guard: &CallGuard,
        what: &str,
        result: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        if guard.breaker.is_open() {
            anyhow::bail!("{} temporarily unavailable (circuit breaker open)", what);
        }
        guard.limiter.wait().await;
        match result.await {
            Ok(value) => {
                guard.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                guard.breaker.record_failure();
                tracing::warn!("{} call failed: {}", what, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MappingService for OsmMapping {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeHit>> {
        Self::guarded(&self.geocode_guard, "geocode", self.nominatim.geocode(address)).await
    }

    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Option<String>> {
        Self::guarded(
            &self.geocode_guard,
            "reverse geocode",
            self.nominatim.reverse_geocode(coordinates),
        )
        .await
    }

    async fn snap_to_road(&self, coordinates: Coordinates) -> Result<Coordinates> {
        Self::guarded(
            &self.routing_guard,
            "road snap",
            self.valhalla.snap_to_road(coordinates),
        )
        .await
    }

    async fn travel_matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<TravelMatrix> {
        Self::guarded(
            &self.routing_guard,
            "travel matrix",
            self.valhalla.travel_matrix(origins, destinations),
        )
        .await
    }

    async fn directions(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        optimize_waypoints: bool,
    ) -> Result<DirectionsResult> {
        Self::guarded(
            &self.routing_guard,
            "directions",
            self.valhalla.directions(origin, destination, waypoints, optimize_waypoints),
        )
        .await
    }

    fn name(&self) -> &str {
        "osm"
    }
}

// ==========================================================================
// Mock backend
// ==========================================================================

/// Deterministic mapping backend for tests and offline runs.
/// Distances are Haversine × road coefficient at school-bus speed.
pub struct MockMapping {
    road_coefficient: f64,
    average_speed_kmh: f64,
}

impl Default for MockMapping {
    fn default() -> Self {
        Self {
            road_coefficient: 1.3,
            average_speed_kmh: 30.0,
        }
    }
}

impl MockMapping {
    pub fn new() -> Self {
        Self::default()
    }

    fn leg(&self, from: Coordinates, to: Coordinates) -> DirectionsLeg {
        let meters = geo::distance_meters(&from, &to) * self.road_coefficient;
        DirectionsLeg {
            start: from,
            end: to,
            distance_meters: meters as u64,
            duration_seconds: (meters / 1000.0 / self.average_speed_kmh * 3600.0) as u64,
        }
    }
}

#[async_trait]
impl MappingService for MockMapping {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeHit>> {
        // Deterministic coordinates from the address hash, inside a small
        // mid-Bohemia box so snapped/matrix calls stay plausible
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        let hash = hasher.finish();

        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFF_FFFF) as f64) / (u32::MAX as f64);

        Ok(vec![GeocodeHit {
            coordinates: Coordinates {
                lat: 49.5 + lat_normalized * 1.0,
                lng: 14.0 + lng_normalized * 1.5,
            },
            formatted_address: address.to_string(),
        }])
    }

    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Option<String>> {
        Ok(Some(format!(
            "{:.4}N {:.4}E (unverified)",
            coordinates.lat, coordinates.lng
        )))
    }

    async fn snap_to_road(&self, coordinates: Coordinates) -> Result<Coordinates> {
        // Identity snap keeps walk distances stable in tests
        Ok(coordinates)
    }

    async fn travel_matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<TravelMatrix> {
        let rows = origins.len();
        let cols = destinations.len();
        if rows == 0 || cols == 0 {
            return Ok(TravelMatrix::empty());
        }

        let mut distances = vec![vec![0u64; cols]; rows];
        let mut durations = vec![vec![0u64; cols]; rows];

        for (i, origin) in origins.iter().enumerate() {
            for (j, destination) in destinations.iter().enumerate() {
                let leg = self.leg(*origin, *destination);
                distances[i][j] = leg.distance_meters;
                durations[i][j] = leg.duration_seconds;
            }
        }

        Ok(TravelMatrix { distances, durations, rows, cols })
    }

    async fn directions(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        optimize_waypoints: bool,
    ) -> Result<DirectionsResult> {
        let mut points = Vec::with_capacity(waypoints.len() + 2);
        points.push(origin);
        points.extend_from_slice(waypoints);
        points.push(destination);

        let legs: Vec<DirectionsLeg> = points
            .windows(2)
            .map(|pair| self.leg(pair[0], pair[1]))
            .collect();

        Ok(DirectionsResult {
            geometry: points.iter().map(|c| [c.lng, c.lat]).collect(),
            legs,
            // The mock does not reorder; report the identity permutation so
            // callers exercising the delegated strategy get an explicit order
            waypoint_order: optimize_waypoints.then(|| (0..waypoints.len()).collect()),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ==========================================================================
// Factory
// ==========================================================================

/// Create the mapping backend with automatic fallback.
///
/// Uses the OSM stack when a Valhalla URL is configured and healthy, the
/// mock backend otherwise. Either way the result is wrapped in the
/// transparent TTL cache.
pub async fn create_mapping_service(
    nominatim_url: &str,
    valhalla_url: Option<String>,
) -> std::sync::Arc<dyn MappingService> {
    use tracing::{info, warn};

    if let Some(url) = valhalla_url {
        match check_valhalla_health(&url).await {
            Ok(()) => {
                info!("Valhalla routing available at {}", url);
                let osm = OsmMapping::new(nominatim_url, ValhallaConfig::new(&url));
                return std::sync::Arc::new(CachedMapping::new(
                    std::sync::Arc::new(osm),
                    CacheTtls::default(),
                ));
            }
            Err(e) => {
                warn!("Valhalla not available at {}: {}. Falling back to mock mapping.", url, e);
            }
        }
    }

    info!("Using mock mapping backend (Valhalla not configured or unavailable)");
    std::sync::Arc::new(CachedMapping::new(
        std::sync::Arc::new(MockMapping::new()),
        CacheTtls::default(),
    ))
}

/// Check if Valhalla is healthy by making a simple status request
async fn check_valhalla_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/status", base_url);
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("Valhalla returned status {}", response.status())
    }
}
