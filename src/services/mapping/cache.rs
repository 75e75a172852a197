//! Transparent response cache for the mapping collaborator
//!
//! Wraps any `MappingService` and memoizes responses behind canonical
//! request keys (coordinates rounded to ~1 m, request order preserved) with
//! endpoint-specific TTLs. The pipeline never talks to this cache directly;
//! it is just another `MappingService`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::Coordinates;
use super::{DirectionsResult, GeocodeHit, MappingService, TravelMatrix};

/// Endpoint-specific time-to-live values
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub geocode: Duration,
    pub reverse_geocode: Duration,
    pub snap: Duration,
    pub matrix: Duration,
    pub directions: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            // Addresses and road geometry barely move
            geocode: Duration::from_secs(24 * 3600),
            reverse_geocode: Duration::from_secs(24 * 3600),
            snap: Duration::from_secs(24 * 3600),
            // Travel times drift with traffic data updates
            matrix: Duration::from_secs(600),
            directions: Duration::from_secs(600),
        }
    }
}

struct Entry<V> {
    value: V,
    inserted: Instant,
}

struct Shelf<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> Shelf<V> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    fn put(&self, key: String, value: V) {
        let mut entries = self.entries.lock();
        // Drop expired entries opportunistically so the map cannot grow
        // without bound over a long-lived process
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted.elapsed() < ttl);
        entries.insert(key, Entry { value, inserted: Instant::now() });
    }
}

/// Round to 5 decimals (~1.1 m) so jittered re-requests hit the cache
fn coord_key(c: &Coordinates) -> String {
    format!("{:.5},{:.5}", c.lat, c.lng)
}

fn coords_key(coords: &[Coordinates]) -> String {
    coords.iter().map(|c| coord_key(c)).collect::<Vec<_>>().join(";")
}

/// Caching wrapper around a mapping backend
pub struct CachedMapping {
    inner: Arc<dyn MappingService>,
    name: String,
    geocode: Shelf<Vec<GeocodeHit>>,
    reverse: Shelf<Option<String>>,
    snap: Shelf<Coordinates>,
    matrix: Shelf<TravelMatrix>,
    directions: Shelf<DirectionsResult>,
}

impl CachedMapping {
    pub fn new(inner: Arc<dyn MappingService>, ttls: CacheTtls) -> Self {
        let name = format!("{} (cached)", inner.name());
        Self {
            inner,
            name,
            geocode: Shelf::new(ttls.geocode),
            reverse: Shelf::new(ttls.reverse_geocode),
            snap: Shelf::new(ttls.snap),
            matrix: Shelf::new(ttls.matrix),
            directions: Shelf::new(ttls.directions),
        }
    }
}

#[async_trait]
impl MappingService for CachedMapping {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeHit>> {
        let key = address.trim().to_lowercase();
        if let Some(hit) = self.geocode.get(&key) {
            return Ok(hit);
        }
        let result = self.inner.geocode(address).await?;
        self.geocode.put(key, result.clone());
        Ok(result)
    }

    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Option<String>> {
        let key = coord_key(&coordinates);
        if let Some(hit) = self.reverse.get(&key) {
            return Ok(hit);
        }
        let result = self.inner.reverse_geocode(coordinates).await?;
        self.reverse.put(key, result.clone());
        Ok(result)
    }

    async fn snap_to_road(&self, coordinates: Coordinates) -> Result<Coordinates> {
        let key = coord_key(&coordinates);
        if let Some(hit) = self.snap.get(&key) {
            return Ok(hit);
        }
        let result = self.inner.snap_to_road(coordinates).await?;
        self.snap.put(key, result);
        Ok(result)
    }

    async fn travel_matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<TravelMatrix> {
        let key = format!("{}|{}", coords_key(origins), coords_key(destinations));
        if let Some(hit) = self.matrix.get(&key) {
            return Ok(hit);
        }
        let result = self.inner.travel_matrix(origins, destinations).await?;
        self.matrix.put(key, result.clone());
        Ok(result)
    }

    async fn directions(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        optimize_waypoints: bool,
    ) -> Result<DirectionsResult> {
        let key = format!(
            "{}|{}|{}|opt={}",
            coord_key(&origin),
            coords_key(waypoints),
            coord_key(&destination),
            optimize_waypoints
        );
        if let Some(hit) = self.directions.get(&key) {
            return Ok(hit);
        }
        let result = self
            .inner
            .directions(origin, destination, waypoints, optimize_waypoints)
            .await?;
        self.directions.put(key, result.clone());
        Ok(result)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
