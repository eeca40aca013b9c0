mod api;
mod datasets;
mod errors;
mod jobs;
mod middleware;
mod validation;

use actix_cors::Cors;
use actix_multipart::form::MultipartFormConfig;
use actix_web::{App, HttpResponse, HttpServer, http::header, middleware::Compress, web};
use anyhow::Result;
use dataset_profiler_core::config::AppConfig;
use dataset_profiler_core::{nats, observability, postgres, storage};
use dotenvy::dotenv;
use tracing::info;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dataset Profiler",
        description = "Ingests tabular datasets and serves generated profile reports"
    ),
    paths(
        api::datasets::upload_dataset,
        api::datasets::get_datasets,
        api::datasets::get_dataset,
        api::datasets::enqueue_dataset_processing,
        api::datasets::get_dataset_report,
        api::jobs::get_jobs,
        api::jobs::get_job,
        api::health::health,
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Load centralized configuration - fail fast if required config is missing
    let config = AppConfig::from_env()?;

    let prometheus = observability::init_observability_api("api", &config.observability)?;

    let hostname = config.server.hostname.clone();
    let port = config.server.port;
    let address = format!("http://{}:{}", hostname, port);
    let shutdown_timeout = config.server.shutdown_timeout_secs.unwrap_or(30);

    let s3_client = storage::initialize_client(&config.s3).await?;
    storage::ensure_bucket_exists(&s3_client, &config.s3.uploads_bucket).await?;
    storage::ensure_bucket_exists(&s3_client, &config.s3.reports_bucket).await?;

    let pg_pool = postgres::initialize_pool(&config.database).await?;

    let nats_client = nats::connect_with_retry(&config.nats.url).await?;
    nats::initialize_jetstream(&nats_client, &config.nats).await?;

    let cors_origins = config.server.cors_allowed_origins.clone();
    let s3_config = config.s3.clone();
    let max_upload_size = config.s3.max_upload_size_bytes;

    info!("Starting ingest service on {}", address);

    let server = HttpServer::new(move || {
        let cors = if cors_origins.is_empty() {
            Cors::default()
                .allowed_origin(&address)
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                ])
                .max_age(3600)
        } else {
            let mut cors = Cors::default()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                ])
                .max_age(3600);
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(prometheus.clone())
            .wrap(middleware::RequestIdMiddleware)
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(pg_pool.clone()))
            .app_data(web::Data::new(s3_client.clone()))
            .app_data(web::Data::new(nats_client.clone()))
            .app_data(web::Data::new(s3_config.clone()))
            .app_data(
                MultipartFormConfig::default()
                    .total_limit(max_upload_size)
                    .memory_limit(max_upload_size),
            )
            .service(api::datasets::upload_dataset)
            .service(api::datasets::get_datasets)
            .service(api::datasets::get_dataset)
            .service(api::datasets::enqueue_dataset_processing)
            .service(api::datasets::get_dataset_report)
            .service(api::jobs::get_jobs)
            .service(api::jobs::get_job)
            .service(api::health::health)
            .route(
                "/openapi.json",
                web::get().to(|| async { HttpResponse::Ok().json(ApiDoc::openapi()) }),
            )
    })
    .bind((hostname, port))?
    .shutdown_timeout(shutdown_timeout)
    .run();

    server.await?;
    Ok(())
}
