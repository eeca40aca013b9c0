use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an uploaded dataset. Stored as lowercase TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Uploaded,
    Processing,
    Done,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Uploaded => "uploaded",
            DatasetStatus::Processing => "processing",
            DatasetStatus::Done => "done",
            DatasetStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DatasetStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "uploaded" => Ok(DatasetStatus::Uploaded),
            "processing" => Ok(DatasetStatus::Processing),
            "done" => Ok(DatasetStatus::Done),
            "failed" => Ok(DatasetStatus::Failed),
            other => Err(format!("unknown dataset status '{other}'")),
        }
    }
}

/// State of a single processing attempt. Stored as lowercase TEXT.
///
/// Transitions are acyclic: queued -> started -> (retrying <-> started)
/// -> success | failure. Terminal rows never mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Started,
    Retrying,
    Success,
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Retrying => "retrying",
            JobState::Success => "success",
            JobState::Failure => "failure",
        }
    }

    /// Active states are covered by the partial unique index on jobs.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Started | JobState::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for JobState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "queued" => Ok(JobState::Queued),
            "started" => Ok(JobState::Started),
            "retrying" => Ok(JobState::Retrying),
            "success" => Ok(JobState::Success),
            "failure" => Ok(JobState::Failure),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Identity of an uploaded blob plus the worker's outcome fields.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Dataset {
    pub dataset_id: Uuid,
    pub name: String,
    pub original_filename: String,
    pub content_type: String,
    #[sqlx(try_from = "String")]
    pub status: DatasetStatus,
    pub checksum_sha256: String,
    pub size_bytes: i64,
    pub upload_bucket: String,
    pub upload_key: String,
    pub upload_etag: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub row_count: Option<i64>,
    pub error: Option<String>,
}

/// Insert payload for a freshly uploaded dataset.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub dataset_id: Uuid,
    pub name: String,
    pub original_filename: String,
    pub content_type: String,
    pub checksum_sha256: String,
    pub size_bytes: i64,
    pub upload_bucket: String,
    pub upload_key: String,
}

/// A single processing attempt against one dataset.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub job_id: Uuid,
    pub dataset_id: Uuid,
    pub task_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub state: JobState,
    pub progress: i32,
    pub attempts: i32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Metadata pointing at a generated report object. One per dataset.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Report {
    pub report_id: Uuid,
    pub dataset_id: Uuid,
    pub report_bucket: String,
    pub report_key: String,
    pub report_etag: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Upsert payload for a generated report.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub dataset_id: Uuid,
    pub report_bucket: String,
    pub report_key: String,
    pub report_etag: Option<String>,
}

/// Read projection: dataset joined with its latest job and report presence.
#[derive(Debug, Clone, FromRow)]
pub struct DatasetSummaryRow {
    #[sqlx(flatten)]
    pub dataset: Dataset,
    pub latest_job_id: Option<Uuid>,
    pub report_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_round_trip() {
        for state in [
            JobState::Queued,
            JobState::Started,
            JobState::Retrying,
            JobState::Success,
            JobState::Failure,
        ] {
            let parsed = JobState::try_from(state.as_str().to_string()).unwrap();
            assert_eq!(parsed, state);
        }
        assert!(JobState::try_from("cancelled".to_string()).is_err());
    }

    #[test]
    fn test_active_and_terminal_partition() {
        assert!(JobState::Queued.is_active());
        assert!(JobState::Started.is_active());
        assert!(JobState::Retrying.is_active());
        assert!(JobState::Success.is_terminal());
        assert!(JobState::Failure.is_terminal());
        assert!(!JobState::Success.is_active());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn test_dataset_status_round_trip() {
        for status in [
            DatasetStatus::Uploaded,
            DatasetStatus::Processing,
            DatasetStatus::Done,
            DatasetStatus::Failed,
        ] {
            let parsed = DatasetStatus::try_from(status.as_str().to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }
}
