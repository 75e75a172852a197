//! Configuration management

use anyhow::Result;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Nominatim API URL (for geocoding)
    pub nominatim_url: String,

    /// Valhalla routing engine URL (optional, falls back to mock if unavailable)
    pub valhalla_url: Option<String>,

    /// Directory for rolling log files
    pub logs_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nominatim_url = std::env::var("NOMINATIM_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());

        let valhalla_url = std::env::var("VALHALLA_URL").ok();

        let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());

        Ok(Self {
            nominatim_url,
            valhalla_url,
            logs_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_valhalla_url_none_when_not_set() {
        std::env::remove_var("VALHALLA_URL");

        let config = Config::from_env().unwrap();
        assert!(config.valhalla_url.is_none());
    }

    #[test]
    fn test_config_valhalla_url_some_when_set() {
        std::env::set_var("VALHALLA_URL", "http://localhost:8002");

        let config = Config::from_env().unwrap();
        assert_eq!(config.valhalla_url, Some("http://localhost:8002".to_string()));

        // Cleanup
        std::env::remove_var("VALHALLA_URL");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_nominatim_url_defaults_to_public() {
        std::env::remove_var("NOMINATIM_URL");

        let config = Config::from_env().unwrap();
        assert_eq!(config.nominatim_url, "https://nominatim.openstreetmap.org");
    }
}
