use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::{ApiError, ApiResult};
use crate::models::job::JobStatus;

const KML_CONTENT_TYPE: &str = "application/vnd.google-earth.kml+xml";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub user_id: String,
    /// Arbitrary GeoJSON; structural validation happens in the worker.
    pub geo: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertJobResponse {
    pub job_id: Uuid,
    pub geo_record_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub geo_record_id: Option<Uuid>,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsParams {
    pub status: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub geo_record_id: Option<Uuid>,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub page: i64,
    pub page_size: i64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilesResponse {
    pub job_id: Uuid,
    pub geo_record_id: Uuid,
    pub status: JobStatus,
    pub geo_json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kml: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteJobResponse {
    pub message: String,
}

/// POST /api/job/convert — submit a GeoJSON document for conversion.
///
/// Creates the job, then its geo record (two steps, not atomic: the worker
/// tolerates an orphan job as a per-job failure), then wakes the worker.
/// Returns 202 since conversion happens asynchronously.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<ConvertRequest>,
) -> ApiResult<(StatusCode, Json<ConvertJobResponse>)> {
    let job = queries::create_job(&state.db, &body.user_id).await?;
    tracing::info!(job_id = %job.id, user_id = %body.user_id, "Created conversion job");

    let record =
        queries::create_geo_record(&state.db, job.id, &body.user_id, &body.geo.to_string())
            .await?;
    tracing::info!(record_id = %record.id, job_id = %job.id, "Created geo record");

    state.wake.notify();
    metrics::counter!("conversion_jobs_submitted").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertJobResponse {
            job_id: job.id,
            geo_record_id: record.id,
            status: job.status,
        }),
    ))
}

/// GET /api/job/{id} — job status by id.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = queries::get_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job ID: {id} not found")))?;
    let record = queries::get_record_by_job(&state.db, id).await?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        geo_record_id: record.map(|r| r.id),
        status: job.status,
    }))
}

/// GET /api/job — list jobs, newest first, with optional status filter.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<Json<JobListResponse>> {
    if params.page < 0 || params.page_size < 1 {
        return Err(ApiError::BadRequest(
            "Invalid pagination: page must be >= 0 and pageSize must be >= 1".to_string(),
        ));
    }

    let status = match params.status.as_deref() {
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Invalid status value. Must be one of: {}",
                JobStatus::VALUES.join(", ")
            ))
        })?),
        None => None,
    };

    let jobs = queries::list_jobs(&state.db, status, params.page, params.page_size).await?;

    let mut summaries = Vec::with_capacity(jobs.len());
    for job in jobs {
        let record = queries::get_record_by_job(&state.db, job.id).await?;
        summaries.push(JobSummary {
            id: job.id,
            geo_record_id: record.map(|r| r.id),
            status: job.status,
            attempts: job.attempts,
            last_error: job.last_error,
        });
    }

    let count = summaries.len();
    Ok(Json(JobListResponse {
        jobs: summaries,
        page: params.page,
        page_size: params.page_size,
        count,
    }))
}

/// GET /api/job/{id}/files — input document, plus output when DONE.
pub async fn get_job_files(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobFilesResponse>> {
    let job = queries::get_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job ID: {id} not found")))?;
    let record = queries::get_record_by_job(&state.db, id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("GeoJSON record for Job ID: {id} not found"))
        })?;

    let kml = if job.status == JobStatus::Done {
        record.kml
    } else {
        None
    };

    Ok(Json(JobFilesResponse {
        job_id: job.id,
        geo_record_id: record.id,
        status: job.status,
        geo_json: record.geojson,
        kml,
    }))
}

/// GET /api/job/{id}/kml — download the converted KML as an attachment.
///
/// Rejected with a status-specific message until the job is DONE.
pub async fn download_kml(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let job = queries::get_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job ID: {id} not found")))?;

    match job.status {
        JobStatus::Done => {}
        JobStatus::Failed => {
            return Err(ApiError::BadRequest(
                "Job has failed. Cannot download KML.".to_string(),
            ));
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "Job is not complete yet. Current status: {other}"
            )));
        }
    }

    let record = queries::get_record_by_job(&state.db, id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("GeoJSON record for Job ID: {id} not found"))
        })?;

    let kml = record
        .kml
        .ok_or_else(|| ApiError::NotFound("KML not available for this job".to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, KML_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"job-{id}.kml\""),
            ),
        ],
        kml,
    ))
}

/// DELETE /api/job/{id} — delete a job and (via cascade) its geo record,
/// regardless of status.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteJobResponse>> {
    if !queries::delete_job(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("Job ID: {id} not found")));
    }

    tracing::info!(job_id = %id, "Deleted job");
    Ok(Json(DeleteJobResponse {
        message: "Deleted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppState;

    // Request validation runs before any query, so a lazy pool that never
    // connects is enough for these.
    fn lazy_state() -> AppState {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/geobridge_test")
            .expect("lazy pool");
        AppState::new(pool)
    }

    fn params(status: Option<&str>, page: i64, page_size: i64) -> ListJobsParams {
        ListJobsParams {
            status: status.map(str::to_string),
            page,
            page_size,
        }
    }

    #[tokio::test]
    async fn test_negative_page_rejected() {
        let result = list_jobs(State(lazy_state()), Query(params(None, -1, 20))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_non_positive_page_size_rejected() {
        let result = list_jobs(State(lazy_state()), Query(params(None, 0, 0))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = list_jobs(State(lazy_state()), Query(params(None, 0, -5))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unrecognized_status_filter_rejected() {
        let result = list_jobs(State(lazy_state()), Query(params(Some("RUNNING"), 0, 20))).await;
        let Err(ApiError::BadRequest(msg)) = result else {
            panic!("expected bad request");
        };
        assert!(msg.contains("PENDING"));
    }
}
