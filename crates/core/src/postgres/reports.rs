use crate::errors::PipelineError;
use crate::models::{NewReport, Report};
use sqlx::{Pool, Postgres, Transaction};
use uuid::Uuid;

const UPSERT_REPORT_QUERY: &str = r#"
    INSERT INTO reports (report_id, dataset_id, report_bucket, report_key, report_etag)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (dataset_id) DO UPDATE
    SET report_bucket = EXCLUDED.report_bucket,
        report_key = EXCLUDED.report_key,
        report_etag = EXCLUDED.report_etag,
        created_at = NOW()
    RETURNING report_id, dataset_id, report_bucket, report_key, report_etag, created_at
"#;

const GET_REPORT_QUERY: &str = r#"
    SELECT report_id, dataset_id, report_bucket, report_key, report_etag, created_at
    FROM reports
    WHERE dataset_id = $1
"#;

const REPORT_EXISTS_QUERY: &str = r#"
    SELECT EXISTS(SELECT 1 FROM reports WHERE dataset_id = $1)
"#;

/// Upsert by dataset inside the caller's finalize transaction.
pub(crate) async fn upsert_report_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    report: &NewReport,
) -> Result<Report, PipelineError> {
    let row = sqlx::query_as::<_, Report>(UPSERT_REPORT_QUERY)
        .bind(Uuid::new_v4())
        .bind(report.dataset_id)
        .bind(&report.report_bucket)
        .bind(&report.report_key)
        .bind(&report.report_etag)
        .fetch_one(&mut **tx)
        .await?;
    Ok(row)
}

pub async fn get_report(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<Option<Report>, PipelineError> {
    let report = sqlx::query_as::<_, Report>(GET_REPORT_QUERY)
        .bind(dataset_id)
        .fetch_optional(pool)
        .await?;
    Ok(report)
}

pub async fn report_exists(
    pool: &Pool<Postgres>,
    dataset_id: Uuid,
) -> Result<bool, PipelineError> {
    let exists: bool = sqlx::query_scalar(REPORT_EXISTS_QUERY)
        .bind(dataset_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}
