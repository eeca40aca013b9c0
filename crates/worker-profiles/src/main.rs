use anyhow::Result;
use dataset_profiler_core::config::AppConfig;
use dataset_profiler_core::retry::RetryPolicy;
use dataset_profiler_core::worker::{self, WorkerConfig, WorkerContext};
use dataset_profiler_core::{nats, postgres, storage};

mod job;
mod parse;
mod profile;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::from_env()?;
    if std::env::var("SERVICE_NAME").is_err() {
        config.observability.service_name = job::WORKER_NAME.to_string();
    }

    // Initialize OpenTelemetry and tracing
    worker::initialize_opentelemetry(&config.observability)?;

    let s3_client = storage::initialize_client(&config.s3).await?;
    let pg_pool = postgres::initialize_pool(&config.database).await?;
    let nats_client = nats::connect_with_retry(&config.nats.url).await?;

    // Job-level config is read once at startup.
    job::init_job_config(
        config.s3.clone(),
        config.limits.clone(),
        RetryPolicy::from_env(),
    );

    let context = WorkerContext {
        s3_client,
        nats_client: nats_client.clone(),
        pg_pool,
    };

    let worker_config = WorkerConfig {
        service_name: config.observability.service_name.clone(),
        stream_name: nats::PROFILE_JOBS_STREAM.to_string(),
        consumer_config: nats::create_profile_consumer_config(&config.worker),
        max_concurrent_jobs: config.worker.max_concurrent_jobs,
        max_deliver: config.worker.max_deliver as u64,
        nats_config: config.nats.clone(),
    };

    worker::run_worker(worker_config, context, job::process_profile_job).await
}
