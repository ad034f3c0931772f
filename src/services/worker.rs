//! Single-worker job processing loop.
//!
//! Exactly one instance of this loop runs, as a dedicated background task
//! spawned at startup. Request handlers only create rows and fire the wake
//! signal; conversion never runs inline. Running a second worker against
//! the same store is unsupported: no lease is recorded on a job, so two
//! loops would double-process.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::event::JobStatusEvent;
use crate::models::job::{Job, JobStatus};
use crate::services::convert;

/// How long an idle worker waits for a wake before re-polling.
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Backoff after a loop-level fault (store unreachable etc).
const LOOP_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Run the worker loop until `cancel` is triggered.
///
/// Per-job failures (bad input, missing record) mark that one job FAILED
/// and never stop the loop. Loop-level faults are logged and followed by a
/// fixed backoff. A job already past dequeue finishes its terminal
/// transition before cancellation takes effect, so no job is abandoned in
/// PROCESSING.
pub async fn run_worker(state: AppState, cancel: CancellationToken) {
    tracing::info!("Job worker started");

    while !cancel.is_cancelled() {
        match process_next_job(&state).await {
            Ok(true) => {
                tracing::debug!("Job handled, checking for next job");
            }
            Ok(false) => {
                // Sleep until signaled or timeout; the timeout covers wakes
                // lost to the fetch/wait race.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = state.wake.wait(WAKE_TIMEOUT) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker loop error");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(LOOP_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    tracing::info!("Job worker stopped");
}

/// Fetch and process the single oldest PENDING job.
///
/// Returns `Ok(true)` if a job was handled, `Ok(false)` when none was
/// pending. Store faults outside the per-job failure scope (the dequeue,
/// the PROCESSING transition, recording a failure) bubble up so the loop
/// backs off instead of refetching the same job hot.
async fn process_next_job(state: &AppState) -> Result<bool, sqlx::Error> {
    let Some(job) = queries::next_pending_job(&state.db).await? else {
        return Ok(false);
    };

    process_job(state, job).await?;
    Ok(true)
}

/// Drive one job from PENDING to a terminal state.
async fn process_job(state: &AppState, job: Job) -> Result<(), sqlx::Error> {
    tracing::info!(job_id = %job.id, user_id = %job.user_id, "Processing conversion job");

    // The PENDING event is redundant with the submit response but keeps
    // the pushed event sequence consistent.
    notify(state, &job, JobStatusEvent::new(job.id, JobStatus::Pending)).await;

    queries::update_job_status(&state.db, job.id, JobStatus::Processing).await?;
    notify(state, &job, JobStatusEvent::new(job.id, JobStatus::Processing)).await;

    let start = std::time::Instant::now();
    match convert_job(state, &job).await {
        Ok(record_id) => {
            metrics::counter!("conversion_jobs_completed").increment(1);
            metrics::histogram!("conversion_processing_seconds")
                .record(start.elapsed().as_secs_f64());

            notify(
                state,
                &job,
                JobStatusEvent::new(job.id, JobStatus::Done).with_record(record_id),
            )
            .await;

            tracing::info!(job_id = %job.id, record_id = %record_id, "Job completed");
        }
        Err(message) => {
            metrics::counter!("conversion_jobs_failed").increment(1);

            queries::mark_job_failed(&state.db, job.id, &message).await?;
            notify(
                state,
                &job,
                JobStatusEvent::new(job.id, JobStatus::Failed).with_error(message.clone()),
            )
            .await;

            tracing::error!(job_id = %job.id, error = %message, "Job failed");
        }
    }

    Ok(())
}

/// Fetch the job's record, convert it, and persist the result.
///
/// Returns the record id on success, or the failure message. A missing
/// record is the same failure path as a conversion error, never a panic:
/// submission creates the job and record in two non-atomic steps, so an
/// orphan job can exist.
async fn convert_job(state: &AppState, job: &Job) -> Result<Uuid, String> {
    let record = queries::get_record_by_job(&state.db, job.id)
        .await
        .map_err(|e| format!("Failed to load geo record: {e}"))?
        .ok_or_else(|| format!("GeoJSON record not found for job {}", job.id))?;

    let kml = convert::convert_to_kml(&record.geojson).map_err(|e| e.to_string())?;

    queries::update_record_kml(&state.db, record.id, &kml)
        .await
        .map_err(|e| format!("Failed to store KML: {e}"))?;

    queries::update_job_status(&state.db, job.id, JobStatus::Done)
        .await
        .map_err(|e| format!("Failed to mark job DONE: {e}"))?;

    Ok(record.id)
}

async fn notify(state: &AppState, job: &Job, event: JobStatusEvent) {
    state.hub.notify_user(&job.user_id, &event).await;
}
