use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::geo_record::GeoRecord;
use crate::models::job::{Job, JobStatus};

const JOB_COLUMNS: &str =
    "id, user_id, status, attempts, last_error, created_at, updated_at";
const RECORD_COLUMNS: &str =
    "id, job_id, user_id, geojson_data, kml, created_at, updated_at";

/// Maximum stored length of a job failure message.
pub const MAX_ERROR_LEN: usize = 1000;

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    // Unrecognized stored values fall back to PENDING rather than failing
    // the whole fetch.
    let status = JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending);

    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        status,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<GeoRecord, sqlx::Error> {
    Ok(GeoRecord {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        user_id: row.try_get("user_id")?,
        geojson: row.try_get("geojson_data")?,
        kml: row.try_get("kml")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new conversion job with status PENDING.
pub async fn create_job(pool: &PgPool, user_id: &str) -> Result<Job, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO jobs (user_id, status)
        VALUES ($1, 'PENDING')
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM jobs
        WHERE id = $1
        "#,
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// List jobs, newest first, with optional status filter and zero-based
/// pagination.
pub async fn list_jobs(
    pool: &PgPool,
    status: Option<JobStatus>,
    page: i64,
    page_size: i64,
) -> Result<Vec<Job>, sqlx::Error> {
    let offset = page * page_size;

    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                r#"
                SELECT {JOB_COLUMNS}
                FROM jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            ))
            .bind(status.as_str())
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                r#"
                SELECT {JOB_COLUMNS}
                FROM jobs
                ORDER BY created_at DESC
                LIMIT $1 OFFSET $2
                "#,
            ))
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(job_from_row).collect()
}

/// Fetch the single oldest PENDING job, if any (the worker's dequeue).
pub async fn next_pending_job(pool: &PgPool) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM jobs
        WHERE status = 'PENDING'
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    ))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Update a job's status.
pub async fn update_job_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(status.as_str())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a job FAILED, storing the failure message truncated to 1000 chars.
pub async fn mark_job_failed(
    pool: &PgPool,
    job_id: Uuid,
    error: &str,
) -> Result<(), sqlx::Error> {
    let truncated: String = error.chars().take(MAX_ERROR_LEN).collect();

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'FAILED', last_error = $1, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(&truncated)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a job; its geo record goes with it via ON DELETE CASCADE.
/// Returns false when no row matched.
pub async fn delete_job(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert the geo record for a job. The input document is stored verbatim;
/// kml stays null until conversion succeeds.
pub async fn create_geo_record(
    pool: &PgPool,
    job_id: Uuid,
    user_id: &str,
    geojson: &str,
) -> Result<GeoRecord, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO geo_records (job_id, user_id, geojson_data)
        VALUES ($1, $2, $3)
        RETURNING {RECORD_COLUMNS}
        "#,
    ))
    .bind(job_id)
    .bind(user_id)
    .bind(geojson)
    .fetch_one(pool)
    .await?;

    record_from_row(&row)
}

/// Get the geo record belonging to a job.
pub async fn get_record_by_job(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<Option<GeoRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {RECORD_COLUMNS}
        FROM geo_records
        WHERE job_id = $1
        "#,
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Store the converted KML on a geo record.
pub async fn update_record_kml(
    pool: &PgPool,
    record_id: Uuid,
    kml: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE geo_records
        SET kml = $1, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(kml)
    .bind(record_id)
    .execute(pool)
    .await?;

    Ok(())
}
