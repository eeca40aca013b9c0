//! The processing pipeline: drives one job from claim to a terminal state.
//!
//! Every state change is a CAS on the job row. Duplicate deliveries die at
//! the claim; transient infrastructure failures loop through the retrying
//! state with backoff; payload errors finalize immediately.

use anyhow::Result;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, instrument, warn};

use dataset_profiler_core::config::{ProfileLimits, S3Config};
use dataset_profiler_core::errors::PipelineError;
use dataset_profiler_core::jobs::ProfileJobMessage;
use dataset_profiler_core::models::NewReport;
use dataset_profiler_core::observability::{
    record_worker_job, record_worker_job_failure, record_worker_job_retry,
};
use dataset_profiler_core::postgres::{datasets, jobs};
use dataset_profiler_core::retry::RetryPolicy;
use dataset_profiler_core::storage;
use dataset_profiler_core::worker::WorkerContext;

use crate::{parse, profile};

pub(crate) const WORKER_NAME: &str = "worker-profiles";

// Progress milestones, written through CAS transitions in step-forward
// order so readers observe a non-decreasing sequence.
const PROGRESS_CLAIMED: i32 = 5;
const PROGRESS_PARSED: i32 = 25;
const PROGRESS_STATS: i32 = 60;
const PROGRESS_ANOMALIES: i32 = 85;

struct JobConfig {
    s3: S3Config,
    limits: ProfileLimits,
    retry: RetryPolicy,
}

static JOB_CONFIG: OnceLock<JobConfig> = OnceLock::new();

/// Initialize job-level configuration. Call once from main.
pub(crate) fn init_job_config(s3: S3Config, limits: ProfileLimits, retry: RetryPolicy) {
    let _ = JOB_CONFIG.set(JobConfig { s3, limits, retry });
}

fn job_config() -> Result<&'static JobConfig, PipelineError> {
    JOB_CONFIG
        .get()
        .ok_or_else(|| PipelineError::Unexpected(anyhow::anyhow!("Job config not initialized")))
}

#[instrument(skip(ctx), fields(job_id = %message.job_id, dataset_id = %message.dataset_id))]
pub(crate) async fn process_profile_job(
    message: ProfileJobMessage,
    ctx: WorkerContext,
) -> Result<()> {
    let start_time = Instant::now();
    let pool = &ctx.pg_pool;
    let config = job_config()?;

    // Claim: starts the attempt and deduplicates redeliveries in one CAS.
    // A missing row here means the job is terminal or another delivery
    // already started it; acknowledging is the whole dedup story.
    let job = match jobs::claim_job(pool, message.job_id, PROGRESS_CLAIMED).await? {
        Some(job) => job,
        None => {
            info!("Claim lost, duplicate delivery acknowledged");
            record_worker_job(
                WORKER_NAME,
                start_time.elapsed().as_secs_f64(),
                "duplicate",
            );
            return Ok(());
        }
    };
    info!(attempts = job.attempts, "Job claimed");

    let mut attempt: u32 = 0;
    loop {
        match run_attempt(&message, &ctx, config).await {
            Ok(row_count) => {
                let duration = start_time.elapsed().as_secs_f64();
                record_worker_job(WORKER_NAME, duration, "success");
                info!(row_count, duration_secs = duration, "Profile job completed");
                return Ok(());
            }
            Err(err) if err.is_transient() && attempt < config.retry.max_attempts => {
                attempt += 1;
                let delay = config.retry.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts = config.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off before retry"
                );
                jobs::mark_job_retrying(pool, message.job_id, &err.to_string()).await?;
                record_worker_job_retry(WORKER_NAME, attempt);
                tokio::time::sleep(delay).await;

                // Re-claim retrying -> started for the next attempt.
                if jobs::claim_job(pool, message.job_id, PROGRESS_CLAIMED)
                    .await?
                    .is_none()
                {
                    warn!("Job no longer retryable after backoff, stopping");
                    return Ok(());
                }
            }
            Err(err) => {
                // Non-retryable, or retries exhausted: finalize as failure.
                finalize_failure(&ctx, &message, &err).await?;
                let duration = start_time.elapsed().as_secs_f64();
                record_worker_job_failure(WORKER_NAME, err.kind());
                record_worker_job(WORKER_NAME, duration, "failure");
                warn!(error = %err, kind = err.kind(), "Profile job failed");
                return Ok(());
            }
        }
    }
}

/// One processing attempt: download, parse, two profile passes, report
/// upload, single-transaction finalize.
async fn run_attempt(
    message: &ProfileJobMessage,
    ctx: &WorkerContext,
    config: &JobConfig,
) -> Result<i64, PipelineError> {
    let pool = &ctx.pg_pool;

    datasets::mark_dataset_processing(pool, message.dataset_id).await?;
    let dataset = datasets::get_dataset(pool, message.dataset_id).await?;

    let bytes = storage::get_object(
        &ctx.s3_client,
        &dataset.upload_bucket,
        &dataset.upload_key,
    )
    .await?;
    info!(size_bytes = bytes.len(), key = %dataset.upload_key, "Upload downloaded");

    let rows = parse::parse_rows(&bytes, &dataset.content_type, &config.limits)?;
    jobs::update_progress(pool, message.job_id, PROGRESS_PARSED).await?;

    let stats = profile::compute_stats(&rows);
    jobs::update_progress(pool, message.job_id, PROGRESS_STATS).await?;

    let outliers = profile::detect_anomalies(&stats);
    jobs::update_progress(pool, message.job_id, PROGRESS_ANOMALIES).await?;

    let report = profile::build_report(message.dataset_id, &stats, outliers);
    let body = serde_json::to_vec(&report).map_err(|e| PipelineError::Unexpected(e.into()))?;
    let row_count = report.row_count as i64;

    let report_key = storage::report_key(message.dataset_id);
    let report_etag = storage::put_object(
        &ctx.s3_client,
        &config.s3.reports_bucket,
        &report_key,
        body,
        "application/json",
    )
    .await?;

    let new_report = NewReport {
        dataset_id: message.dataset_id,
        report_bucket: config.s3.reports_bucket.clone(),
        report_key,
        report_etag,
    };
    jobs::finalize_success(pool, message.job_id, message.dataset_id, row_count, &new_report)
        .await?;

    Ok(row_count)
}

/// Terminal failure: the job row carries the message, the dataset mirrors it.
async fn finalize_failure(
    ctx: &WorkerContext,
    message: &ProfileJobMessage,
    err: &PipelineError,
) -> Result<(), PipelineError> {
    let pool = &ctx.pg_pool;
    let error_message = err.to_string();

    let updated = jobs::mark_job_failure(pool, message.job_id, &error_message).await?;
    if !updated {
        warn!("Job was already terminal while recording failure");
    }
    if let Err(e) = datasets::mark_dataset_failed(pool, message.dataset_id, &error_message).await {
        warn!(error = %e, "Failed to mirror the error onto the dataset row");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_milestones_are_strictly_increasing() {
        let milestones = [
            PROGRESS_CLAIMED,
            PROGRESS_PARSED,
            PROGRESS_STATS,
            PROGRESS_ANOMALIES,
            100,
        ];
        assert!(milestones.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(milestones.iter().all(|p| (0..=100).contains(p)));
    }
}
