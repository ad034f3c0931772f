use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The stored input/output document pair for one job.
///
/// `kml` stays null until the worker converts the GeoJSON successfully.
/// Deleting the parent job cascades to this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub user_id: String,
    pub geojson: String,
    pub kml: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
