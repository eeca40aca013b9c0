use crate::errors::PipelineError;
use crate::models::{Dataset, DatasetSummaryRow, NewDataset};
use crate::observability::record_database_query;
use sqlx::{Pool, Postgres};
use std::time::Instant;
use uuid::Uuid;

const CREATE_DATASET_QUERY: &str = r#"
    INSERT INTO datasets (dataset_id, name, original_filename, content_type, status,
                          checksum_sha256, size_bytes, upload_bucket, upload_key)
    VALUES ($1, $2, $3, $4, 'uploaded', $5, $6, $7, $8)
    ON CONFLICT (checksum_sha256) DO NOTHING
    RETURNING dataset_id, name, original_filename, content_type, status, checksum_sha256,
              size_bytes, upload_bucket, upload_key, upload_etag, uploaded_at, processed_at,
              row_count, error
"#;

const GET_DATASET_BY_CHECKSUM_QUERY: &str = r#"
    SELECT dataset_id, name, original_filename, content_type, status, checksum_sha256,
           size_bytes, upload_bucket, upload_key, upload_etag, uploaded_at, processed_at,
           row_count, error
    FROM datasets
    WHERE checksum_sha256 = $1
"#;

const GET_DATASET_QUERY: &str = r#"
    SELECT dataset_id, name, original_filename, content_type, status, checksum_sha256,
           size_bytes, upload_bucket, upload_key, upload_etag, uploaded_at, processed_at,
           row_count, error
    FROM datasets
    WHERE dataset_id = $1
"#;

const GET_DATASET_SUMMARY_QUERY: &str = r#"
    SELECT d.dataset_id, d.name, d.original_filename, d.content_type, d.status,
           d.checksum_sha256, d.size_bytes, d.upload_bucket, d.upload_key, d.upload_etag,
           d.uploaded_at, d.processed_at, d.row_count, d.error,
           latest.job_id AS latest_job_id,
           (r.dataset_id IS NOT NULL) AS report_available
    FROM datasets d
    LEFT JOIN LATERAL (
        SELECT job_id FROM jobs
        WHERE dataset_id = d.dataset_id
        ORDER BY queued_at DESC
        LIMIT 1
    ) latest ON TRUE
    LEFT JOIN reports r ON r.dataset_id = d.dataset_id
    WHERE d.dataset_id = $1
"#;

const LIST_DATASET_SUMMARIES_QUERY: &str = r#"
    SELECT d.dataset_id, d.name, d.original_filename, d.content_type, d.status,
           d.checksum_sha256, d.size_bytes, d.upload_bucket, d.upload_key, d.upload_etag,
           d.uploaded_at, d.processed_at, d.row_count, d.error,
           latest.job_id AS latest_job_id,
           (r.dataset_id IS NOT NULL) AS report_available
    FROM datasets d
    LEFT JOIN LATERAL (
        SELECT job_id FROM jobs
        WHERE dataset_id = d.dataset_id
        ORDER BY queued_at DESC
        LIMIT 1
    ) latest ON TRUE
    LEFT JOIN reports r ON r.dataset_id = d.dataset_id
    ORDER BY d.uploaded_at DESC
    LIMIT $1 OFFSET $2
"#;

const SET_UPLOAD_ETAG_QUERY: &str = r#"
    UPDATE datasets SET upload_etag = $2 WHERE dataset_id = $1
"#;

const DELETE_DATASET_QUERY: &str = r#"
    DELETE FROM datasets WHERE dataset_id = $1
"#;

const MARK_PROCESSING_QUERY: &str = r#"
    UPDATE datasets
    SET status = 'processing'
    WHERE dataset_id = $1 AND status IN ('uploaded', 'processing', 'failed')
"#;

const MARK_FAILED_QUERY: &str = r#"
    UPDATE datasets
    SET status = 'failed', error = $2
    WHERE dataset_id = $1 AND status = 'processing'
"#;

/// Atomic insert-or-fetch keyed by the upload checksum. Returns the row and
/// whether this call created it.
pub async fn create_dataset_if_new(
    pool: &Pool<Postgres>,
    new: &NewDataset,
) -> Result<(Dataset, bool), PipelineError> {
    let start = Instant::now();

    let inserted = sqlx::query_as::<_, Dataset>(CREATE_DATASET_QUERY)
        .bind(new.dataset_id)
        .bind(&new.name)
        .bind(&new.original_filename)
        .bind(&new.content_type)
        .bind(&new.checksum_sha256)
        .bind(new.size_bytes)
        .bind(&new.upload_bucket)
        .bind(&new.upload_key)
        .fetch_optional(pool)
        .await;

    let duration = start.elapsed().as_secs_f64();
    record_database_query("INSERT", "datasets", duration, inserted.is_ok());

    match inserted? {
        Some(dataset) => Ok((dataset, true)),
        None => {
            // Lost to an earlier upload of the same bytes; hand back that row.
            let existing = sqlx::query_as::<_, Dataset>(GET_DATASET_BY_CHECKSUM_QUERY)
                .bind(&new.checksum_sha256)
                .fetch_one(pool)
                .await?;
            Ok((existing, false))
        }
    }
}

pub async fn get_dataset(pool: &Pool<Postgres>, dataset_id: Uuid) -> Result<Dataset, PipelineError> {
    let dataset = sqlx::query_as::<_, Dataset>(GET_DATASET_QUERY)
        .bind(dataset_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PipelineError::NotFound)?;
    Ok(dataset)
}

pub async fn get_dataset_summary(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<DatasetSummaryRow, PipelineError> {
    let summary = sqlx::query_as::<_, DatasetSummaryRow>(GET_DATASET_SUMMARY_QUERY)
        .bind(dataset_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PipelineError::NotFound)?;
    Ok(summary)
}

pub async fn list_dataset_summaries(
    pool: &Pool<Postgres>,
    limit: i64,
    offset: i64,
) -> Result<Vec<DatasetSummaryRow>, PipelineError> {
    let start = Instant::now();

    let result = sqlx::query_as::<_, DatasetSummaryRow>(LIST_DATASET_SUMMARIES_QUERY)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await;

    let duration = start.elapsed().as_secs_f64();
    record_database_query("SELECT", "datasets", duration, result.is_ok());

    Ok(result?)
}

pub async fn set_upload_etag(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
    etag: &str,
) -> Result<(), PipelineError> {
    sqlx::query(SET_UPLOAD_ETAG_QUERY)
        .bind(dataset_id)
        .bind(etag)
        .execute(pool)
        .await?;
    Ok(())
}

/// Removes a dataset row. Only used to roll back an insert whose blob write
/// failed, so a retried upload is not deduplicated against a row with no blob.
pub async fn delete_dataset(pool: &Pool<Postgres>, dataset_id: Uuid) -> Result<(), PipelineError> {
    sqlx::query(DELETE_DATASET_QUERY)
        .bind(dataset_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// CAS uploaded/processing/failed -> processing. Returns false when the
/// dataset was already terminal-done (or missing).
pub async fn mark_dataset_processing(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(MARK_PROCESSING_QUERY)
        .bind(dataset_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// CAS processing -> failed, mirroring the job error onto the dataset row.
pub async fn mark_dataset_failed(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
    error: &str,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(MARK_FAILED_QUERY)
        .bind(dataset_id)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// Referenced by jobs::finalize_success so the three finalize statements stay
// in one place per table.
pub(crate) const MARK_DONE_QUERY: &str = r#"
    UPDATE datasets
    SET status = 'done', processed_at = NOW(), row_count = $2, error = NULL
    WHERE dataset_id = $1 AND status = 'processing'
"#;
