use serde::Serialize;
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Status event pushed to the submitting user on every job transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub job_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusEvent {
    pub fn new(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            event_type: "JOB_STATUS",
            job_id,
            status,
            job_type: "CONVERT",
            geo_record_id: None,
            error: None,
        }
    }

    pub fn with_record(mut self, geo_record_id: Uuid) -> Self {
        self.geo_record_id = Some(geo_record_id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
