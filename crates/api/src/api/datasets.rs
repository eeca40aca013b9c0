use actix_multipart::form::{MultipartForm, bytes::Bytes as UploadedFile, text::Text};
use actix_web::{
    HttpResponse, Responder, ResponseError, get, post,
    web::{self, Data, Path},
};
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres};
use tracing::{error, info};
use uuid::Uuid;

use dataset_profiler_core::config::S3Config;
use dataset_profiler_core::models::NewDataset;
use dataset_profiler_core::postgres::{datasets, reports};
use dataset_profiler_core::storage;

use crate::{
    datasets::models::{DatasetList, DatasetSummary, DatasetUpload, PaginationParams},
    errors::ApiError,
    jobs::{enqueue, models::EnqueueAccepted},
    validation,
};

/// Fallback filename when the multipart file part carries none.
const DEFAULT_FILENAME: &str = "upload.bin";

#[derive(Debug, MultipartForm)]
pub(crate) struct DatasetUploadForm {
    pub name: Text<String>,
    pub file: UploadedFile,
}

#[utoipa::path(
    responses(
        (status = 201, description = "Created (or deduplicated onto the existing dataset)", body = DatasetUpload),
        (status = 415, description = "Unsupported content type"),
        (status = 422, description = "Validation failure"),
        (status = 503, description = "Storage or metadata store unavailable"),
    ),
    tag = "Datasets",
)]
#[post("/datasets")]
#[tracing::instrument(name = "upload_dataset", skip(pool, s3_client, s3_config, form))]
pub(crate) async fn upload_dataset(
    pool: Data<Pool<Postgres>>,
    s3_client: Data<aws_sdk_s3::Client>,
    s3_config: Data<S3Config>,
    MultipartForm(form): MultipartForm<DatasetUploadForm>,
) -> impl Responder {
    let pool = pool.into_inner();
    let name = form.name.0;

    if let Err(e) = validation::validate_dataset_name(&name) {
        return ApiError::Validation(e).error_response();
    }

    let content_type = match form.file.content_type.as_ref() {
        Some(ct) if validation::is_supported_content_type(ct) => ct.essence_str().to_string(),
        Some(ct) => {
            return ApiError::UnsupportedMediaType(format!("Unsupported content type '{ct}'"))
                .error_response();
        }
        None => {
            return ApiError::UnsupportedMediaType(
                "File part must declare a content type".to_string(),
            )
            .error_response();
        }
    };

    let bytes = form.file.data.to_vec();
    if bytes.is_empty() {
        return ApiError::Validation("Uploaded file is empty".to_string()).error_response();
    }
    if bytes.len() > s3_config.max_upload_size_bytes {
        return ApiError::Validation(format!(
            "File exceeds maximum size of {} bytes",
            s3_config.max_upload_size_bytes
        ))
        .error_response();
    }

    let checksum = hex::encode(Sha256::digest(&bytes));
    let original_filename = form
        .file
        .file_name
        .clone()
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    let dataset_id = Uuid::new_v4();
    let new_dataset = NewDataset {
        dataset_id,
        name,
        original_filename: original_filename.clone(),
        content_type: content_type.clone(),
        checksum_sha256: checksum,
        size_bytes: bytes.len() as i64,
        upload_bucket: s3_config.uploads_bucket.clone(),
        upload_key: storage::upload_key(dataset_id, &original_filename),
    };

    let (dataset, created) = match datasets::create_dataset_if_new(&pool, &new_dataset).await {
        Ok(result) => result,
        Err(e) => return ApiError::from(e).error_response(),
    };

    if !created {
        // Same bytes were uploaded before, possibly under another name; the
        // checksum row is the single source of truth.
        info!(dataset_id = %dataset.dataset_id, "Upload deduplicated by checksum");
        return HttpResponse::Created().json(DatasetUpload::from(dataset));
    }

    match storage::put_object(
        &s3_client,
        &dataset.upload_bucket,
        &dataset.upload_key,
        bytes,
        &content_type,
    )
    .await
    {
        Ok(etag) => {
            if let Some(etag) = etag
                && let Err(e) = datasets::set_upload_etag(&pool, dataset.dataset_id, &etag).await
            {
                error!(dataset_id = %dataset.dataset_id, error = %e, "Failed to store upload etag");
            }
        }
        Err(e) => {
            error!(dataset_id = %dataset.dataset_id, error = %e, "Blob write failed after insert");
            // Roll the row back so a retried upload is not deduplicated
            // against a dataset with no blob behind it.
            if let Err(del_err) = datasets::delete_dataset(&pool, dataset.dataset_id).await {
                error!(dataset_id = %dataset.dataset_id, error = %del_err, "Rollback delete failed");
            }
            return ApiError::from(e).error_response();
        }
    }

    HttpResponse::Created().json(DatasetUpload::from(dataset))
}

#[utoipa::path(
    params(
        ("limit" = Option<i64>, Query, description = "Number of items to return (default 100)"),
        ("offset" = Option<i64>, Query, description = "Number of items to skip (default 0)"),
    ),
    responses(
        (status = 200, description = "OK", body = DatasetList),
        (status = 503, description = "Metadata store unavailable"),
    ),
    tag = "Datasets",
)]
#[get("/datasets")]
#[tracing::instrument(name = "get_datasets", skip(pool, query))]
pub(crate) async fn get_datasets(
    pool: Data<Pool<Postgres>>,
    query: web::Query<PaginationParams>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    match datasets::list_dataset_summaries(&pool, limit, offset).await {
        Ok(rows) => HttpResponse::Ok().json(DatasetList {
            datasets: rows.into_iter().map(DatasetSummary::from).collect(),
        }),
        Err(e) => ApiError::from(e).error_response(),
    }
}

#[utoipa::path(
    params(
        ("dataset_id" = String, Path, description = "The dataset ID"),
    ),
    responses(
        (status = 200, description = "OK", body = DatasetSummary),
        (status = 404, description = "Not Found"),
        (status = 503, description = "Metadata store unavailable"),
    ),
    tag = "Datasets",
)]
#[get("/datasets/{dataset_id}")]
#[tracing::instrument(name = "get_dataset", skip(pool))]
pub(crate) async fn get_dataset(
    pool: Data<Pool<Postgres>>,
    dataset_id: Path<Uuid>,
) -> impl Responder {
    match datasets::get_dataset_summary(&pool, dataset_id.into_inner()).await {
        Ok(row) => HttpResponse::Ok().json(DatasetSummary::from(row)),
        Err(e) => ApiError::from(e).error_response(),
    }
}

#[utoipa::path(
    params(
        ("dataset_id" = String, Path, description = "The dataset ID"),
    ),
    responses(
        (status = 202, description = "Job queued (or the already-tracked job)", body = EnqueueAccepted),
        (status = 404, description = "Not Found"),
        (status = 503, description = "Queue or metadata store unavailable"),
    ),
    tag = "Datasets",
)]
#[post("/datasets/{dataset_id}/process")]
#[tracing::instrument(name = "enqueue_dataset_processing", skip(pool, nats_client))]
pub(crate) async fn enqueue_dataset_processing(
    pool: Data<Pool<Postgres>>,
    nats_client: Data<async_nats::Client>,
    dataset_id: Path<Uuid>,
) -> impl Responder {
    match enqueue::enqueue_processing(&pool, &nats_client, dataset_id.into_inner()).await {
        Ok(job) => HttpResponse::Accepted().json(EnqueueAccepted::from(&job)),
        Err(e) => ApiError::from(e).error_response(),
    }
}

#[utoipa::path(
    params(
        ("dataset_id" = String, Path, description = "The dataset ID"),
    ),
    responses(
        (status = 200, description = "The generated profile report"),
        (status = 404, description = "Report not ready"),
        (status = 503, description = "Object store unavailable"),
    ),
    tag = "Datasets",
)]
#[get("/datasets/{dataset_id}/report")]
#[tracing::instrument(name = "get_dataset_report", skip(pool, s3_client))]
pub(crate) async fn get_dataset_report(
    pool: Data<Pool<Postgres>>,
    s3_client: Data<aws_sdk_s3::Client>,
    dataset_id: Path<Uuid>,
) -> impl Responder {
    let dataset_id = dataset_id.into_inner();

    let report = match reports::get_report(&pool, dataset_id).await {
        Ok(Some(report)) => report,
        Ok(None) => {
            return ApiError::NotFound(format!("No report available for dataset '{dataset_id}'"))
                .error_response();
        }
        Err(e) => return ApiError::from(e).error_response(),
    };

    match storage::get_object(&s3_client, &report.report_bucket, &report.report_key).await {
        Ok(body) => HttpResponse::Ok()
            .content_type(mime::APPLICATION_JSON)
            .body(body),
        Err(e) => ApiError::from(e).error_response(),
    }
}
