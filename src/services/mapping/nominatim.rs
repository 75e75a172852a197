//! Nominatim geocoding client

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Coordinates;
use super::GeocodeHit;

/// Nominatim API response
///
/// Nominatim returns latitude/longitude as strings named `lat`/`lon`; this
/// is the only place those spellings exist; everything past this boundary
/// uses the canonical `Coordinates` type.
#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct NominatimReverseResult {
    display_name: String,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str, timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("busplan-worker/0.3 (school transport planner)")
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.to_string(),
            client,
        }
    }

    /// Geocode a free-form address to candidate coordinates
    pub async fn geocode(&self, address: &str) -> Result<Vec<GeocodeHit>> {
        let url = format!(
            "{}/search?q={}&format=json&limit=5",
            self.base_url,
            urlencoding::encode(address)
        );

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send geocoding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Nominatim search returned status {}", response.status());
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            let lat: f64 = result.lat.parse().context("Invalid latitude")?;
            let lng: f64 = result.lon.parse().context("Invalid longitude")?;
            hits.push(GeocodeHit {
                coordinates: Coordinates { lat, lng },
                formatted_address: result.display_name,
            });
        }

        Ok(hits)
    }

    /// Reverse geocode coordinates to a display address
    pub async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Option<String>> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=json",
            self.base_url,
            coordinates.lat,
            coordinates.lng
        );

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send reverse geocoding request")?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let result: NominatimReverseResult = response
            .json()
            .await
            .context("Failed to parse reverse geocoding response")?;

        Ok(Some(result.display_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require network access and hit the public Nominatim API
    // They are marked as ignored by default

    #[tokio::test]
    #[ignore]
    async fn test_geocode_prague() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org", 10);

        let hits = client
            .geocode("Václavské náměstí, Praha")
            .await
            .unwrap();

        assert!(!hits.is_empty());
        let coords = hits[0].coordinates;

        // Václavské náměstí is around 50.08°N, 14.43°E
        assert!((coords.lat - 50.08).abs() < 0.1);
        assert!((coords.lng - 14.43).abs() < 0.1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_reverse_geocode_returns_display_name() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org", 10);

        let address = client
            .reverse_geocode(Coordinates { lat: 50.0755, lng: 14.4378 })
            .await
            .unwrap();

        assert!(address.is_some());
    }
}
