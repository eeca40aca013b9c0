//! Idempotent enqueue: the race-safety heart of the ingest side.
//!
//! Concurrent calls for the same dataset converge on one job: the active-job
//! fast path catches the common case, and the partial unique index on the
//! jobs table arbitrates the insert race in the remaining window.

use dataset_profiler_core::errors::PipelineError;
use dataset_profiler_core::jobs::ProfileJobMessage;
use dataset_profiler_core::models::{DatasetStatus, Job};
use dataset_profiler_core::nats::publish_profile_job;
use dataset_profiler_core::postgres::jobs::CreateJobOutcome;
use dataset_profiler_core::postgres::{datasets, jobs, reports};
use sqlx::{Pool, Postgres};
use tracing::{info, warn};
use uuid::Uuid;

pub(crate) const ENQUEUE_FAILED_ERROR: &str = "Failed to enqueue task.";

#[tracing::instrument(name = "enqueue_processing", skip(pool, nats_client))]
pub(crate) async fn enqueue_processing(
    pool: &Pool<Postgres>,
    nats_client: &async_nats::Client,
    dataset_id: Uuid,
) -> Result<Job, PipelineError> {
    let dataset = datasets::get_dataset(pool, dataset_id).await?;

    // Idempotency fast path: an active job wins over everything else.
    if let Some(active) = jobs::find_active_job(pool, dataset_id).await? {
        return Ok(active);
    }

    // Completed datasets with a report are never reprocessed; hand back the
    // job that produced the report, or synthesize one for datasets that
    // reached done through an administrative path.
    if dataset.status == DatasetStatus::Done && reports::report_exists(pool, dataset_id).await? {
        if let Some(latest) = jobs::latest_job_for_dataset(pool, dataset_id).await? {
            return Ok(latest);
        }
        let job = jobs::insert_synthetic_success_job(pool, dataset_id).await?;
        info!(job_id = %job.job_id, "Synthesized success job for completed dataset");
        return Ok(job);
    }

    let mut job = match jobs::create_queued_job(pool, dataset_id).await? {
        CreateJobOutcome::Created(job) => job,
        // Lost the insert race; the winner's job is just as good.
        CreateJobOutcome::ActiveExists(existing) => return Ok(existing),
    };

    let message = ProfileJobMessage {
        dataset_id,
        job_id: job.job_id,
    };
    match publish_profile_job(nats_client, &message).await {
        Ok(task_id) => {
            jobs::set_job_task_id(pool, job.job_id, &task_id).await?;
            info!(job_id = %job.job_id, task_id = %task_id, "Profile job queued");
            job.task_id = Some(task_id);
            Ok(job)
        }
        Err(publish_err) => {
            // The job must not linger as queued with no message behind it.
            warn!(
                job_id = %job.job_id,
                error = %publish_err,
                "Publish failed, finalizing job as failure"
            );
            if let Err(e) = jobs::mark_job_failure(pool, job.job_id, ENQUEUE_FAILED_ERROR).await {
                warn!(job_id = %job.job_id, error = %e, "Failed to record enqueue failure");
            }
            Err(publish_err)
        }
    }
}
