use chrono::{DateTime, Utc};
use dataset_profiler_core::models::{Dataset, DatasetStatus, DatasetSummaryRow};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Response body for a completed upload. Re-uploads of identical bytes
/// return the already-existing dataset.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub(crate) struct DatasetUpload {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub name: String,
    pub original_filename: String,
    pub content_type: String,
    #[schema(value_type = String)]
    pub status: DatasetStatus,
    pub checksum_sha256: String,
    pub size_bytes: i64,
    #[schema(value_type = String, format = DateTime)]
    pub uploaded_at: DateTime<Utc>,
}

impl From<Dataset> for DatasetUpload {
    fn from(dataset: Dataset) -> Self {
        Self {
            id: dataset.dataset_id,
            name: dataset.name,
            original_filename: dataset.original_filename,
            content_type: dataset.content_type,
            status: dataset.status,
            checksum_sha256: dataset.checksum_sha256,
            size_bytes: dataset.size_bytes,
            uploaded_at: dataset.uploaded_at,
        }
    }
}

/// Read projection of a dataset with its latest job and report flag.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub(crate) struct DatasetSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub name: String,
    #[schema(value_type = String)]
    pub status: DatasetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub latest_job_id: Option<Uuid>,
    pub report_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DatasetSummaryRow> for DatasetSummary {
    fn from(row: DatasetSummaryRow) -> Self {
        Self {
            id: row.dataset.dataset_id,
            name: row.dataset.name,
            status: row.dataset.status,
            row_count: row.dataset.row_count,
            latest_job_id: row.latest_job_id,
            report_available: row.report_available,
            error: row.dataset.error,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub(crate) struct DatasetList {
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
