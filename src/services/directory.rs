//! Student directory boundary
//!
//! The directory owns student records; the pipeline only reads active
//! students with home coordinates. The CSV implementation accepts the
//! header spellings seen in the wild (`lat`/`latitude`/`y`, …) and
//! normalizes them into the canonical coordinate fields at this boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::types::StudentLocation;

/// Result of loading the directory: usable students plus the count of
/// records excluded for missing/non-numeric coordinates. Excluded students
/// are reported, never silently assigned.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    pub students: Vec<StudentLocation>,
    pub excluded_count: usize,
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    /// Active students with their home locations
    async fn active_students(&self) -> Result<DirectoryListing>;
}

/// One CSV row; aliases cover the coordinate field spellings observed
/// across exports
#[derive(Debug, serde::Deserialize)]
struct CsvStudentRow {
    #[serde(alias = "student_id", default)]
    id: Option<Uuid>,
    #[serde(alias = "latitude", alias = "y", default)]
    lat: Option<f64>,
    #[serde(alias = "lon", alias = "long", alias = "longitude", alias = "x", default)]
    lng: Option<f64>,
    #[serde(alias = "address", alias = "home_address", default)]
    home_address: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// CSV-backed student directory
pub struct CsvStudentDirectory {
    path: std::path::PathBuf,
}

impl CsvStudentDirectory {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(content: &str) -> DirectoryListing {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut listing = DirectoryListing::default();

        for (line, record) in reader.deserialize::<CsvStudentRow>().enumerate() {
            let row = match record {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping malformed student row {}: {}", line + 2, e);
                    listing.excluded_count += 1;
                    continue;
                }
            };

            if !row.active {
                continue;
            }

            match (row.lat, row.lng) {
                (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                    listing.students.push(StudentLocation {
                        id: row.id.unwrap_or_else(Uuid::new_v4),
                        lat,
                        lng,
                        home_address: row.home_address,
                        active: true,
                    });
                }
                _ => {
                    warn!("Student row {} has unusable coordinates, excluding", line + 2);
                    listing.excluded_count += 1;
                }
            }
        }

        listing
    }
}

#[async_trait]
impl StudentDirectory for CsvStudentDirectory {
    async fn active_students(&self) -> Result<DirectoryListing> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read student file {}", self.path.display()))?;
        Ok(Self::parse(&content))
    }
}
