use crate::errors::PipelineError;
use crate::models::{Job, NewReport};
use crate::observability::record_database_query;
use sqlx::{Pool, Postgres};
use std::time::Instant;
use uuid::Uuid;

/// SQLSTATE for unique constraint violations; raised by the partial unique
/// index when a second active job is inserted for the same dataset.
const UNIQUE_VIOLATION: &str = "23505";

const CREATE_QUEUED_JOB_QUERY: &str = r#"
    INSERT INTO jobs (job_id, dataset_id, state, progress, attempts)
    VALUES ($1, $2, 'queued', 0, 0)
    RETURNING job_id, dataset_id, task_id, state, progress, attempts,
              queued_at, started_at, finished_at, error
"#;

const FIND_ACTIVE_JOB_QUERY: &str = r#"
    SELECT job_id, dataset_id, task_id, state, progress, attempts,
           queued_at, started_at, finished_at, error
    FROM jobs
    WHERE dataset_id = $1 AND state IN ('queued', 'started', 'retrying')
    LIMIT 1
"#;

const LATEST_JOB_FOR_DATASET_QUERY: &str = r#"
    SELECT job_id, dataset_id, task_id, state, progress, attempts,
           queued_at, started_at, finished_at, error
    FROM jobs
    WHERE dataset_id = $1
    ORDER BY queued_at DESC
    LIMIT 1
"#;

const GET_JOB_QUERY: &str = r#"
    SELECT job_id, dataset_id, task_id, state, progress, attempts,
           queued_at, started_at, finished_at, error
    FROM jobs
    WHERE job_id = $1
"#;

const LIST_JOBS_QUERY: &str = r#"
    SELECT job_id, dataset_id, task_id, state, progress, attempts,
           queued_at, started_at, finished_at, error
    FROM jobs
    ORDER BY queued_at DESC
    LIMIT $1 OFFSET $2
"#;

const CLAIM_JOB_QUERY: &str = r#"
    UPDATE jobs
    SET state = 'started',
        started_at = COALESCE(started_at, NOW()),
        progress = GREATEST(progress, $2)
    WHERE job_id = $1 AND state IN ('queued', 'retrying')
    RETURNING job_id, dataset_id, task_id, state, progress, attempts,
              queued_at, started_at, finished_at, error
"#;

const UPDATE_PROGRESS_QUERY: &str = r#"
    UPDATE jobs
    SET progress = GREATEST(progress, $2)
    WHERE job_id = $1 AND state = 'started'
"#;

const MARK_RETRYING_QUERY: &str = r#"
    UPDATE jobs
    SET state = 'retrying', attempts = attempts + 1, error = $2
    WHERE job_id = $1 AND state = 'started'
"#;

const MARK_FAILURE_QUERY: &str = r#"
    UPDATE jobs
    SET state = 'failure', finished_at = NOW(), error = $2
    WHERE job_id = $1 AND state IN ('queued', 'started', 'retrying')
"#;

// Guarded on the active set: a fast worker may already have finalized the
// job, and terminal rows never mutate.
const SET_TASK_ID_QUERY: &str = r#"
    UPDATE jobs
    SET task_id = $2
    WHERE job_id = $1 AND state IN ('queued', 'started', 'retrying')
"#;

const INSERT_SYNTHETIC_SUCCESS_QUERY: &str = r#"
    INSERT INTO jobs (job_id, dataset_id, state, progress, attempts, started_at, finished_at)
    VALUES ($1, $2, 'success', 100, 0, NOW(), NOW())
    RETURNING job_id, dataset_id, task_id, state, progress, attempts,
              queued_at, started_at, finished_at, error
"#;

const FINALIZE_JOB_SUCCESS_QUERY: &str = r#"
    UPDATE jobs
    SET state = 'success', progress = 100, finished_at = NOW(), error = NULL
    WHERE job_id = $1 AND state = 'started'
"#;

/// Outcome of the queued-job insert.
#[derive(Debug)]
pub enum CreateJobOutcome {
    Created(Job),
    /// The partial unique index rejected the insert; this is the job that
    /// already holds the active slot.
    ActiveExists(Job),
}

pub async fn create_queued_job(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<CreateJobOutcome, PipelineError> {
    let start = Instant::now();

    let inserted = sqlx::query_as::<_, Job>(CREATE_QUEUED_JOB_QUERY)
        .bind(Uuid::new_v4())
        .bind(dataset_id)
        .fetch_one(pool)
        .await;

    let duration = start.elapsed().as_secs_f64();
    record_database_query("INSERT", "jobs", duration, inserted.is_ok());

    match inserted {
        Ok(job) => Ok(CreateJobOutcome::Created(job)),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            match find_active_job(pool, dataset_id).await? {
                Some(existing) => Ok(CreateJobOutcome::ActiveExists(existing)),
                // The racing job went terminal between the insert and this
                // select; callers treat it like any other lost CAS.
                None => Err(PipelineError::Conflict),
            }
        }
        Err(other) => Err(other.into()),
    }
}

pub async fn find_active_job(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<Option<Job>, PipelineError> {
    let job = sqlx::query_as::<_, Job>(FIND_ACTIVE_JOB_QUERY)
        .bind(dataset_id)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

pub async fn latest_job_for_dataset(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<Option<Job>, PipelineError> {
    let job = sqlx::query_as::<_, Job>(LATEST_JOB_FOR_DATASET_QUERY)
        .bind(dataset_id)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

pub async fn get_job(pool: &Pool<Postgres>, job_id: Uuid) -> Result<Job, PipelineError> {
    let job = sqlx::query_as::<_, Job>(GET_JOB_QUERY)
        .bind(job_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PipelineError::NotFound)?;
    Ok(job)
}

pub async fn list_jobs(
    pool: &Pool<Postgres>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Job>, PipelineError> {
    let start = Instant::now();

    let result = sqlx::query_as::<_, Job>(LIST_JOBS_QUERY)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await;

    let duration = start.elapsed().as_secs_f64();
    record_database_query("SELECT", "jobs", duration, result.is_ok());

    Ok(result?)
}

/// CAS queued/retrying -> started. Returns None when the job is terminal or
/// already started elsewhere; that is the duplicate-delivery signal.
pub async fn claim_job(
    pool: &Pool<Postgres>,
    job_id: Uuid,
    progress: i32,
) -> Result<Option<Job>, PipelineError> {
    let job = sqlx::query_as::<_, Job>(CLAIM_JOB_QUERY)
        .bind(job_id)
        .bind(progress)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

/// Advance the progress milestone of a started job. Conflict when the job is
/// no longer in the started state.
pub async fn update_progress(
    pool: &Pool<Postgres>,
    job_id: Uuid,
    progress: i32,
) -> Result<(), PipelineError> {
    let result = sqlx::query(UPDATE_PROGRESS_QUERY)
        .bind(job_id)
        .bind(progress)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(PipelineError::Conflict);
    }
    Ok(())
}

/// CAS started -> retrying between transient-failure attempts.
pub async fn mark_job_retrying(
    pool: &Pool<Postgres>,
    job_id: Uuid,
    error: &str,
) -> Result<(), PipelineError> {
    let result = sqlx::query(MARK_RETRYING_QUERY)
        .bind(job_id)
        .bind(error)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(PipelineError::Conflict);
    }
    Ok(())
}

/// Terminal CAS into failure from any active state. Returns false when the
/// job was already terminal.
pub async fn mark_job_failure(
    pool: &Pool<Postgres>,
    job_id: Uuid,
    error: &str,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(MARK_FAILURE_QUERY)
        .bind(job_id)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_job_task_id(
    pool: &Pool<Postgres>,
    job_id: Uuid,
    task_id: &str,
) -> Result<(), PipelineError> {
    sqlx::query(SET_TASK_ID_QUERY)
        .bind(job_id)
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Success row for datasets that reached done outside the normal pipeline.
/// No broker message corresponds to it, so `task_id` stays NULL.
pub async fn insert_synthetic_success_job(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<Job, PipelineError> {
    let job = sqlx::query_as::<_, Job>(INSERT_SYNTHETIC_SUCCESS_QUERY)
        .bind(Uuid::new_v4())
        .bind(dataset_id)
        .fetch_one(pool)
        .await?;
    Ok(job)
}

/// Single-transaction finalize: upsert the report row, CAS the job
/// started -> success and the dataset processing -> done. Either CAS
/// matching zero rows aborts the whole transaction, which preserves
/// "report row exists <=> dataset done <=> job success".
pub async fn finalize_success(
    pool: &Pool<Postgres>,
    job_id: Uuid,
    dataset_id: Uuid,
    row_count: i64,
    report: &NewReport,
) -> Result<(), PipelineError> {
    let start = Instant::now();
    let mut tx = pool.begin().await?;

    super::reports::upsert_report_in_tx(&mut tx, report).await?;

    let job_updated = sqlx::query(FINALIZE_JOB_SUCCESS_QUERY)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
    if job_updated.rows_affected() == 0 {
        return Err(PipelineError::Conflict);
    }

    let dataset_updated = sqlx::query(super::datasets::MARK_DONE_QUERY)
        .bind(dataset_id)
        .bind(row_count)
        .execute(&mut *tx)
        .await?;
    if dataset_updated.rows_affected() == 0 {
        return Err(PipelineError::Conflict);
    }

    tx.commit().await?;

    let duration = start.elapsed().as_secs_f64();
    record_database_query("UPDATE", "jobs", duration, true);
    Ok(())
}
