//! Student and coordinate types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Both components are finite numbers
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// A student home location, as supplied by the student directory.
/// Read-only input to the optimization pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLocation {
    pub id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub home_address: String,
    pub active: bool,
}

impl StudentLocation {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates { lat: self.lat, lng: self.lng }
    }

    /// Students with missing or non-numeric coordinates cannot be placed;
    /// they are skipped with a warning, never silently assigned.
    pub fn is_placeable(&self) -> bool {
        self.coordinates().is_valid()
    }
}

/// The school, the fixed start and end of every vehicle route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depot {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Depot {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates { lat: self.lat, lng: self.lng }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(lat: f64, lng: f64) -> StudentLocation {
        StudentLocation {
            id: Uuid::new_v4(),
            lat,
            lng,
            home_address: "Hlavní 1, Praha".to_string(),
            active: true,
        }
    }

    #[test]
    fn test_finite_coordinates_are_placeable() {
        assert!(student(50.0, 14.4).is_placeable());
    }

    #[test]
    fn test_nan_coordinates_are_not_placeable() {
        assert!(!student(f64::NAN, 14.4).is_placeable());
        assert!(!student(50.0, f64::INFINITY).is_placeable());
    }

    #[test]
    fn test_student_serializes_camel_case() {
        let json = serde_json::to_string(&student(50.0, 14.4)).unwrap();
        assert!(json.contains("\"homeAddress\""));
    }
}
