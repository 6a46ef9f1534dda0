use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::db::job_queries::{self, RecordRunResult};
use crate::errors::AppError;
use crate::models::{JobDescriptor, Lease, LeaseRequest, RecordRunRequest, MAX_NAME_LEN};
use crate::state::AppState;

const MAX_LEASE_TTL_SECS: u64 = 24 * 3600;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(find_jobs).post(create_job))
        .route("/:name", patch(record_run))
        .route("/:name/lease", post(acquire_lease).delete(release_lease))
}

#[derive(Debug, Deserialize)]
struct JobQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HolderQuery {
    holder: String,
}

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "job name must be 1..={} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_descriptor(descriptor: &JobDescriptor) -> Result<(), AppError> {
    descriptor.validate().map_err(AppError::Validation)
}

fn validate_run_request(request: &RecordRunRequest) -> Result<(), AppError> {
    if request.lease_holder.trim().is_empty() {
        return Err(AppError::Validation(
            "lease_holder is required to record a run".into(),
        ));
    }
    request.update.validate().map_err(AppError::Validation)
}

fn validate_lease_request(request: &LeaseRequest) -> Result<(), AppError> {
    if request.holder.trim().is_empty() {
        return Err(AppError::Validation("lease holder is required".into()));
    }
    if request.ttl_secs == 0 || request.ttl_secs > MAX_LEASE_TTL_SECS {
        return Err(AppError::Validation(format!(
            "ttl_secs must be 1..={}",
            MAX_LEASE_TTL_SECS
        )));
    }
    Ok(())
}

/// GET /api/jobs?name= - 200 with a one-element array, or 204
async fn find_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Response, AppError> {
    match job_queries::find_by_name(&state.pool, &query.name).await? {
        Some(descriptor) => Ok(Json(vec![descriptor]).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/jobs - 201, or 409 when the name is taken
async fn create_job(
    State(state): State<AppState>,
    Json(descriptor): Json<JobDescriptor>,
) -> Result<StatusCode, AppError> {
    validate_descriptor(&descriptor)?;

    if job_queries::insert_if_absent(&state.pool, &descriptor).await? {
        info!("Registered etl job {}", descriptor.name);
        Ok(StatusCode::CREATED)
    } else {
        Err(AppError::Conflict(format!("job {} already exists", descriptor.name)))
    }
}

/// PATCH /api/jobs/:name - record a completed run
async fn record_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RecordRunRequest>,
) -> Result<Json<JobDescriptor>, AppError> {
    validate_name(&name)?;
    validate_run_request(&request)?;

    let result =
        job_queries::record_run(&state.pool, &name, &request.update, &request.lease_holder).await?;

    match result {
        RecordRunResult::Updated => {
            info!("Recorded run of {}; next run after {}", name, request.update.next_run);
            job_queries::find_by_name(&state.pool, &name)
                .await?
                .map(Json)
                .ok_or(AppError::NotFound)
        }
        RecordRunResult::NotFound => Err(AppError::NotFound),
        RecordRunResult::LeaseMismatch => Err(AppError::Conflict(format!(
            "job {} is leased to another holder",
            name
        ))),
    }
}

/// POST /api/jobs/:name/lease - 200 with the lease, 409 when held elsewhere
async fn acquire_lease(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<LeaseRequest>,
) -> Result<Json<Lease>, AppError> {
    validate_name(&name)?;
    validate_lease_request(&request)?;

    let ttl = i64::try_from(request.ttl_secs).unwrap_or(i64::MAX);
    match job_queries::acquire_lease(&state.pool, &name, &request.holder, ttl, Utc::now()).await? {
        Some(lease) => Ok(Json(lease)),
        None => match job_queries::find_by_name(&state.pool, &name).await? {
            Some(_) => Err(AppError::Conflict(format!("job {} is leased", name))),
            None => Err(AppError::NotFound),
        },
    }
}

/// DELETE /api/jobs/:name/lease?holder= - always 204; releasing a lease you do not hold is a no-op
async fn release_lease(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HolderQuery>,
) -> Result<StatusCode, AppError> {
    job_queries::release_lease(&state.pool, &name, &query.holder).await?;
    Ok(StatusCode::NO_CONTENT)
}
