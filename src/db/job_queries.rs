use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};

use crate::models::{JobDescriptor, Lease, RunUpdate};

#[derive(Debug, FromRow)]
struct JobRow {
    name: String,
    registered_since: DateTime<Utc>,
    last_run: DateTime<Utc>,
    next_run: DateTime<Utc>,
    elapsed_secs: i64,
    retention_days: i32,
    interval_days: i32,
}

impl From<JobRow> for JobDescriptor {
    fn from(row: JobRow) -> Self {
        JobDescriptor {
            name: row.name,
            registered_since: row.registered_since,
            last_run: row.last_run,
            next_run: row.next_run,
            elapsed: Duration::try_seconds(row.elapsed_secs).unwrap_or_else(Duration::zero),
            retention_days: row.retention_days,
            interval_days: row.interval_days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRunResult {
    Updated,
    NotFound,
    /// The job exists but is leased to someone else.
    LeaseMismatch,
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<JobDescriptor>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        "SELECT name, registered_since, last_run, next_run, elapsed_secs, retention_days, interval_days
         FROM etl_jobs
         WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(JobDescriptor::from))
}

/// Inserts the descriptor unless one with that name exists. Returns whether it was inserted.
pub async fn insert_if_absent(pool: &PgPool, descriptor: &JobDescriptor) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO etl_jobs
         (name, registered_since, last_run, next_run, elapsed_secs, retention_days, interval_days)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(&descriptor.name)
    .bind(descriptor.registered_since)
    .bind(descriptor.last_run)
    .bind(descriptor.next_run)
    .bind(descriptor.elapsed.num_seconds())
    .bind(descriptor.retention_days)
    .bind(descriptor.interval_days)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Writes a completed run back. The row must be leased to `holder`.
pub async fn record_run(
    pool: &PgPool,
    name: &str,
    update: &RunUpdate,
    holder: &str,
) -> Result<RecordRunResult, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE etl_jobs
         SET last_run = $2, next_run = $3, elapsed_secs = $4
         WHERE name = $1
           AND lease_holder = $5",
    )
    .bind(name)
    .bind(update.last_run)
    .bind(update.next_run)
    .bind(update.elapsed.num_seconds())
    .bind(holder)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(RecordRunResult::Updated);
    }

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM etl_jobs WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await?;

    Ok(if exists == 0 {
        RecordRunResult::NotFound
    } else {
        RecordRunResult::LeaseMismatch
    })
}

/// Takes the lease if it is free, expired, or already ours. Single statement, so two
/// callers racing on the same row cannot both win.
pub async fn acquire_lease(
    pool: &PgPool,
    name: &str,
    holder: &str,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<Option<Lease>, sqlx::Error> {
    let expires_at = now + Duration::seconds(ttl_secs);

    let row = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
        "UPDATE etl_jobs
         SET lease_holder = $2, lease_expires_at = $3
         WHERE name = $1
           AND (lease_holder IS NULL OR lease_holder = $2 OR lease_expires_at IS NULL OR lease_expires_at < $4)
         RETURNING name, lease_holder, lease_expires_at",
    )
    .bind(name)
    .bind(holder)
    .bind(expires_at)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(name, holder, expires_at)| Lease {
        name,
        holder,
        expires_at,
    }))
}

pub async fn release_lease(pool: &PgPool, name: &str, holder: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE etl_jobs
         SET lease_holder = NULL, lease_expires_at = NULL
         WHERE name = $1 AND lease_holder = $2",
    )
    .bind(name)
    .bind(holder)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
