//! Async job ledger queries.
//!
//! Jobs are a state machine: `PENDING -> RUNNING -> {COMPLETED, FAILED}`.
//! The push queue delivers callbacks at-least-once, so the `PENDING ->
//! RUNNING` transition is a conditional update: whichever delivery wins the
//! update owns the execution, the rest observe a non-PENDING job and no-op.

use crate::error::Result;
use crate::store::{is_unique_violation, Job, JobStatus, NewJob};
use chrono::Utc;
use sqlx::SqliteConnection;

const JOB_COLUMNS: &str =
    "id, job_type, status, payload, result, error, idempotency_key, created_at, updated_at";

/// Create a PENDING job. A duplicate `idempotency_key` returns the existing
/// job with `created = false`.
///
/// # Errors
///
/// Returns an error if the insert fails for any other reason, or if the
/// conflicting row cannot be re-read.
pub async fn create(conn: &mut SqliteConnection, new: &NewJob) -> Result<(Job, bool)> {
    let now = Utc::now();
    let result = sqlx::query_as::<_, Job>(&format!(
        r"
        INSERT INTO jobs (id, job_type, status, payload, idempotency_key, created_at, updated_at)
        VALUES (?, ?, 'PENDING', ?, ?, ?, ?)
        RETURNING {JOB_COLUMNS}
        "
    ))
    .bind(&new.id)
    .bind(&new.job_type)
    .bind(&new.payload)
    .bind(&new.idempotency_key)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(job) => Ok((job, true)),
        Err(e) if is_unique_violation(&e) => {
            let existing = by_idempotency_key(conn, &new.idempotency_key)
                .await?
                .ok_or_else(|| {
                    crate::Error::Internal(format!(
                        "job conflict for idempotency key {} but no row found",
                        new.idempotency_key
                    ))
                })?;
            Ok((existing, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Load a job by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn by_id(conn: &mut SqliteConnection, id: &str) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(job)
}

/// Load a job by idempotency key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn by_idempotency_key(conn: &mut SqliteConnection, key: &str) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = ?"
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(job)
}

/// Claim a PENDING job for execution. Returns `false` when the job is
/// already RUNNING or terminal; this is the duplicate-delivery guard.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn claim(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result =
        sqlx::query("UPDATE jobs SET status = 'RUNNING', updated_at = ? WHERE id = ? AND status = 'PENDING'")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Finish a job as COMPLETED with a JSON result.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn complete(conn: &mut SqliteConnection, id: &str, result_json: &str) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'COMPLETED', result = ?, updated_at = ? WHERE id = ?")
        .bind(result_json)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Finish a job as FAILED with an error description.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn fail(conn: &mut SqliteConnection, id: &str, error: &str) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'FAILED', error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Current status of a job. Diagnostic helper.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn status(conn: &mut SqliteConnection, id: &str) -> Result<Option<JobStatus>> {
    let status: Option<JobStatus> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(status)
}
