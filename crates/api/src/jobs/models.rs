use chrono::{DateTime, Utc};
use dataset_profiler_core::models::{Job, JobState};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Read projection of a processing job.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub(crate) struct JobView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = String, format = Uuid)]
    pub dataset_id: Uuid,
    #[schema(value_type = String)]
    pub state: JobState,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.job_id,
            dataset_id: job.dataset_id,
            state: job.state,
            progress: job.progress,
            error: job.error,
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub(crate) struct JobList {
    pub jobs: Vec<JobView>,
}

/// Body of the 202 returned by the enqueue endpoint.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub(crate) struct EnqueueAccepted {
    #[schema(value_type = String, format = Uuid)]
    pub job_id: Uuid,
    #[schema(value_type = String, format = Uuid)]
    pub dataset_id: Uuid,
    #[schema(value_type = String)]
    pub state: JobState,
    pub progress: i32,
}

impl From<&Job> for EnqueueAccepted {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            dataset_id: job.dataset_id,
            state: job.state,
            progress: job.progress,
        }
    }
}
