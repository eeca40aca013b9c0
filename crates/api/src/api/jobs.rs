use actix_web::{
    HttpResponse, Responder, ResponseError, get,
    web::{self, Data, Path},
};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use dataset_profiler_core::postgres::jobs;

use crate::{
    datasets::models::PaginationParams,
    errors::ApiError,
    jobs::models::{JobList, JobView},
};

#[utoipa::path(
    params(
        ("limit" = Option<i64>, Query, description = "Number of items to return (default 100)"),
        ("offset" = Option<i64>, Query, description = "Number of items to skip (default 0)"),
    ),
    responses(
        (status = 200, description = "OK", body = JobList),
        (status = 503, description = "Metadata store unavailable"),
    ),
    tag = "Jobs",
)]
#[get("/jobs")]
#[tracing::instrument(name = "get_jobs", skip(pool, query))]
pub(crate) async fn get_jobs(
    pool: Data<Pool<Postgres>>,
    query: web::Query<PaginationParams>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    match jobs::list_jobs(&pool, limit, offset).await {
        Ok(rows) => HttpResponse::Ok().json(JobList {
            jobs: rows.into_iter().map(JobView::from).collect(),
        }),
        Err(e) => ApiError::from(e).error_response(),
    }
}

#[utoipa::path(
    params(
        ("job_id" = String, Path, description = "The job ID"),
    ),
    responses(
        (status = 200, description = "OK", body = JobView),
        (status = 404, description = "Not Found"),
        (status = 503, description = "Metadata store unavailable"),
    ),
    tag = "Jobs",
)]
#[get("/jobs/{job_id}")]
#[tracing::instrument(name = "get_job", skip(pool))]
pub(crate) async fn get_job(pool: Data<Pool<Postgres>>, job_id: Path<Uuid>) -> impl Responder {
    match jobs::get_job(&pool, job_id.into_inner()).await {
        Ok(job) => HttpResponse::Ok().json(JobView::from(job)),
        Err(e) => ApiError::from(e).error_response(),
    }
}
