use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a conversion job in the async pipeline.
///
/// `InProgress` exists in the schema but is never assigned by current
/// logic; it is reserved alongside `attempts` for a future retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "PROCESSING" => Some(JobStatus::Processing),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// All accepted values, for error messages on bad filter input.
    pub const VALUES: [&'static str; 5] =
        ["PENDING", "PROCESSING", "IN_PROGRESS", "DONE", "FAILED"];

    /// DONE and FAILED are terminal; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GeoJSON-to-KML conversion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for value in JobStatus::VALUES {
            let status = JobStatus::parse(value).unwrap();
            assert_eq!(status.as_str(), value);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(JobStatus::parse("RUNNING").is_none());
        assert!(JobStatus::parse("pending").is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
