use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message published to the broker per enqueued job and consumed by the
/// profile worker. Delivery is at-least-once; the worker deduplicates via
/// the claim transition on the job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileJobMessage {
    pub dataset_id: Uuid,
    pub job_id: Uuid,
}
