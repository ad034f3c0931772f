//! Integration tests for the conversion job lifecycle.
//!
//! These run the real worker loop against a live PostgreSQL instance
//! (configured via environment variables, migrations applied on startup).
//!
//! Run with: cargo test --test integration_test -- --ignored

use std::time::Duration;

use axum::extract::ws::Message;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use geobridge::app_state::AppState;
use geobridge::config::AppConfig;
use geobridge::db::{self, queries};
use geobridge::models::job::JobStatus;
use geobridge::services::worker;

async fn test_state() -> AppState {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    AppState::new(pool)
}

/// Poll until the job reaches a terminal state or the deadline passes.
async fn wait_for_terminal(state: &AppState, job_id: Uuid) -> JobStatus {
    for _ in 0..100 {
        let job = queries::get_job(&state.db, job_id)
            .await
            .expect("Failed to get job")
            .expect("Job not found");
        if job.status.is_terminal() {
            return job.status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Job {job_id} never reached a terminal state");
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_valid_submission_reaches_done() {
    let state = test_state().await;
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(state.clone(), cancel.clone()));

    let geojson = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "P1"},
             "geometry": {"type": "Point", "coordinates": [10, 10]}},
            {"type": "Feature", "properties": {"name": "P2"},
             "geometry": {"type": "Point", "coordinates": [20, 20]}},
            {"type": "Feature", "properties": {"name": "Area"},
             "geometry": {"type": "Polygon",
              "coordinates": [[[0, 0], [5, 0], [5, 5], [0, 0]]]}}
        ]
    }"#;

    let job = queries::create_job(&state.db, "it-user")
        .await
        .expect("Failed to create job");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);

    let created = queries::create_geo_record(&state.db, job.id, "it-user", geojson)
        .await
        .expect("Failed to create record");
    state.wake.notify();

    assert_eq!(wait_for_terminal(&state, job.id).await, JobStatus::Done);

    let record = queries::get_record_by_job(&state.db, job.id)
        .await
        .expect("Failed to get record")
        .expect("Record not found");
    assert_eq!(record.id, created.id);
    let kml = record.kml.expect("KML missing on DONE job");
    assert_eq!(kml.matches("<Placemark>").count(), 3);
    // Polygon boundary carries exactly the 4 submitted coordinate pairs.
    assert!(kml.contains("0.0,0.0,0.0 5.0,0.0,0.0 5.0,5.0,0.0 0.0,0.0,0.0"));

    // Terminal state persists across further wakes.
    state.wake.notify();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let job = queries::get_job(&state.db, job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Done);

    cancel.cancel();
    worker_handle.await.expect("Worker task panicked");
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_unparseable_input_reaches_failed() {
    let state = test_state().await;
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(state.clone(), cancel.clone()));

    let job = queries::create_job(&state.db, "it-user")
        .await
        .expect("Failed to create job");
    queries::create_geo_record(&state.db, job.id, "it-user", "this is not geojson")
        .await
        .expect("Failed to create record");
    state.wake.notify();

    assert_eq!(wait_for_terminal(&state, job.id).await, JobStatus::Failed);

    let job = queries::get_job(&state.db, job.id)
        .await
        .unwrap()
        .unwrap();
    let error = job.last_error.expect("FAILED job must carry an error");
    assert!(!error.is_empty());
    assert!(error.chars().count() <= 1000);

    cancel.cancel();
    worker_handle.await.expect("Worker task panicked");
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_job_without_record_fails_without_crashing_worker() {
    let state = test_state().await;
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(state.clone(), cancel.clone()));

    // Orphan job: submission crashed between the two creation steps.
    let orphan = queries::create_job(&state.db, "it-user")
        .await
        .expect("Failed to create job");
    state.wake.notify();

    assert_eq!(wait_for_terminal(&state, orphan.id).await, JobStatus::Failed);

    // The worker survived and still processes subsequent jobs.
    let job = queries::create_job(&state.db, "it-user")
        .await
        .expect("Failed to create job");
    queries::create_geo_record(
        &state.db,
        job.id,
        "it-user",
        r#"{"type": "Point", "coordinates": [1, 2]}"#,
    )
    .await
    .expect("Failed to create record");
    state.wake.notify();

    assert_eq!(wait_for_terminal(&state, job.id).await, JobStatus::Done);

    cancel.cancel();
    worker_handle.await.expect("Worker task panicked");
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_unknown_top_level_type_still_reaches_done() {
    let state = test_state().await;
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(state.clone(), cancel.clone()));

    let job = queries::create_job(&state.db, "it-user")
        .await
        .expect("Failed to create job");
    queries::create_geo_record(&state.db, job.id, "it-user", r#"{"type": "Unsupported"}"#)
        .await
        .expect("Failed to create record");
    state.wake.notify();

    // Zero placemarks is not a failure; only unparseable input is.
    assert_eq!(wait_for_terminal(&state, job.id).await, JobStatus::Done);

    let record = queries::get_record_by_job(&state.db, job.id)
        .await
        .unwrap()
        .unwrap();
    let kml = record.kml.expect("KML missing on DONE job");
    assert_eq!(kml.matches("<Placemark>").count(), 0);

    cancel.cancel();
    worker_handle.await.expect("Worker task panicked");
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_delete_cascades_to_record() {
    let state = test_state().await;

    let job = queries::create_job(&state.db, "it-user")
        .await
        .expect("Failed to create job");
    queries::create_geo_record(
        &state.db,
        job.id,
        "it-user",
        r#"{"type": "Point", "coordinates": [1, 2]}"#,
    )
    .await
    .expect("Failed to create record");

    assert!(queries::delete_job(&state.db, job.id).await.unwrap());

    assert!(queries::get_job(&state.db, job.id).await.unwrap().is_none());
    assert!(queries::get_record_by_job(&state.db, job.id)
        .await
        .unwrap()
        .is_none());

    // Deleting again reports nothing matched.
    assert!(!queries::delete_job(&state.db, job.id).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_pending_jobs_processed_oldest_first() {
    let state = test_state().await;

    let first = queries::create_job(&state.db, "it-user").await.unwrap();
    let second = queries::create_job(&state.db, "it-user").await.unwrap();

    // The shared database may hold even older pending jobs from other runs;
    // assert the ordering property rather than an exact id.
    let next = queries::next_pending_job(&state.db)
        .await
        .unwrap()
        .expect("No pending job");
    assert_eq!(next.status, JobStatus::Pending);
    assert!(next.created_at <= first.created_at);
    assert!(next.created_at <= second.created_at);
}

#[tokio::test]
#[ignore] // Requires a running PostgreSQL instance
async fn test_failing_status_update_backs_off_instead_of_spinning() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let writable = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&writable)
        .await
        .expect("Failed to run migrations");

    // A pool that serves SELECTs but rejects every write, simulating a
    // store in read-only mode. The dequeue keeps finding the same PENDING
    // job while the PROCESSING transition keeps failing.
    let read_only = PgPoolOptions::new()
        .max_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET default_transaction_read_only = on")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect read-only pool");

    let state = AppState::new(read_only);
    let user = format!("backoff-user-{}", Uuid::new_v4());
    let mut rx = state.hub.subscribe(&user, Uuid::new_v4()).await;

    let job = queries::create_job(&writable, &user)
        .await
        .expect("Failed to create job");
    queries::create_geo_record(
        &writable,
        job.id,
        &user,
        r#"{"type": "Point", "coordinates": [1, 2]}"#,
    )
    .await
    .expect("Failed to create record");

    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(state.clone(), cancel.clone()));
    state.wake.notify();

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    worker_handle.await.expect("Worker task panicked");

    // With the 500 ms loop backoff the job is attempted at most a handful
    // of times in one second; a hot loop would push hundreds of PENDING
    // events in the same window.
    let mut pending_events = 0;
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            if text.contains("\"status\":\"PENDING\"") {
                pending_events += 1;
            }
        }
    }
    assert!(
        pending_events <= 5,
        "expected backoff between attempts, got {pending_events} PENDING events"
    );

    // The failed write left the job untouched.
    let job = queries::get_job(&writable, job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    queries::delete_job(&writable, job.id)
        .await
        .expect("Failed to clean up job");
}
