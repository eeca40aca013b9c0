use crate::config::{NatsConfig, WorkerConfig};
use crate::errors::PipelineError;
use crate::jobs::ProfileJobMessage;
use anyhow::{Context, Result};
use async_nats::Client;
use async_nats::jetstream::{
    self,
    consumer::pull::Config as ConsumerConfig,
    stream::{Config as StreamConfig, RetentionPolicy},
};
use std::time::Duration;
use tracing::{info, warn};

/// JetStream stream carrying profile job messages.
pub const PROFILE_JOBS_STREAM: &str = "PROFILE_JOBS";
/// Subject profile job messages are published on.
pub const PROFILE_JOBS_SUBJECT: &str = "jobs.profile";
/// Durable name of the worker consumer.
pub const PROFILE_WORKERS_CONSUMER: &str = "profile-workers";

const CONNECT_ATTEMPTS: u32 = 10;

pub async fn connect_with_retry(url: &str) -> Result<Client> {
    let mut delay = Duration::from_millis(500);
    for attempt in 1..CONNECT_ATTEMPTS {
        match async_nats::connect(url).await {
            Ok(client) => {
                if attempt > 1 {
                    info!(attempt, "Connected to NATS after retry");
                }
                return Ok(client);
            }
            Err(e) => {
                warn!(attempt, error = %e, "NATS connection failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
        }
    }
    async_nats::connect(url)
        .await
        .context("Failed to connect to NATS")
}

pub async fn initialize_jetstream(client: &Client, config: &NatsConfig) -> Result<()> {
    let jetstream = jetstream::new(client.clone());

    ensure_stream(
        &jetstream,
        StreamConfig {
            name: PROFILE_JOBS_STREAM.to_string(),
            subjects: vec![PROFILE_JOBS_SUBJECT.to_string()],
            retention: RetentionPolicy::WorkQueue,
            max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            duplicate_window: Duration::from_secs(5 * 60),  // 5 minutes for deduplication
            num_replicas: config.replicas as usize,
            ..Default::default()
        },
    )
    .await?;

    info!(stream = PROFILE_JOBS_STREAM, "JetStream topology ready");
    Ok(())
}

/// Provision a stream idempotently: create it when absent, then reconcile
/// config drift on whatever was already there (get_or_create leaves an
/// existing stream's settings untouched).
async fn ensure_stream(jetstream: &jetstream::Context, desired: StreamConfig) -> Result<()> {
    let name = desired.name.clone();

    let mut stream = jetstream
        .get_or_create_stream(desired.clone())
        .await
        .map_err(|e| anyhow::anyhow!("stream '{name}' could not be provisioned: {e}"))?;

    let live = stream.info().await?.config.clone();
    if !stream_matches(&live, &desired) {
        warn!(stream = %name, "Live stream settings drifted from the desired config, reconciling");
        jetstream
            .update_stream(desired)
            .await
            .map_err(|e| anyhow::anyhow!("stream '{name}' rejected the reconciled config: {e}"))?;
    }

    Ok(())
}

/// The settings the pipeline actually depends on; the rest may drift.
fn stream_matches(live: &StreamConfig, desired: &StreamConfig) -> bool {
    live.name == desired.name
        && live.subjects == desired.subjects
        && live.retention == desired.retention
        && live.num_replicas == desired.num_replicas
}

pub fn create_profile_consumer_config(worker: &WorkerConfig) -> ConsumerConfig {
    ConsumerConfig {
        durable_name: Some(PROFILE_WORKERS_CONSUMER.to_string()),
        description: Some("Consumer for dataset profile jobs".to_string()),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        ack_wait: worker.ack_wait,
        max_deliver: worker.max_deliver,
        max_ack_pending: 100, // Backpressure limit
        ..Default::default()
    }
}

/// Bind the durable worker consumer, creating it on first run.
pub async fn ensure_consumer(
    jetstream: &jetstream::Context,
    stream_name: &str,
    consumer_config: ConsumerConfig,
) -> Result<jetstream::consumer::Consumer<ConsumerConfig>> {
    let durable = consumer_config
        .durable_name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("worker consumers must be durable"))?;

    let stream = jetstream
        .get_stream(stream_name)
        .await
        .map_err(|e| anyhow::anyhow!("stream '{stream_name}' is not available: {e}"))?;

    let consumer = stream
        .get_or_create_consumer(&durable, consumer_config)
        .await
        .map_err(|e| {
            anyhow::anyhow!("consumer '{durable}' could not be bound on '{stream_name}': {e}")
        })?;

    info!(consumer = %durable, stream = %stream_name, "Durable consumer bound");
    Ok(consumer)
}

/// Publish one job message, awaiting the JetStream ack.
///
/// The `Nats-Msg-Id` header is the job id, so broker-side deduplication
/// inside the duplicate window collapses doubled publishes. The returned
/// task id is the stream sequence of the acked publish.
pub async fn publish_profile_job(
    client: &Client,
    message: &ProfileJobMessage,
) -> Result<String, PipelineError> {
    let payload =
        serde_json::to_vec(message).map_err(|e| PipelineError::Unexpected(e.into()))?;

    let jetstream = jetstream::new(client.clone());
    let mut headers = async_nats::HeaderMap::new();
    let msg_id = message.job_id.to_string();
    headers.insert("Nats-Msg-Id", msg_id.as_str());

    let ack = jetstream
        .publish_with_headers(PROFILE_JOBS_SUBJECT, headers, payload.into())
        .await
        .map_err(|e| PipelineError::QueueUnavailable(e.into()))?
        .await
        .map_err(|e| PipelineError::QueueUnavailable(e.into()))?;

    Ok(format!("{}:{}", ack.stream, ack.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_matches_ignores_incidental_fields() {
        let desired = StreamConfig {
            name: PROFILE_JOBS_STREAM.to_string(),
            subjects: vec![PROFILE_JOBS_SUBJECT.to_string()],
            retention: RetentionPolicy::WorkQueue,
            num_replicas: 1,
            ..Default::default()
        };

        // Identical settings match, and a drifted max_age alone is not
        // considered drift.
        let mut live = desired.clone();
        assert!(stream_matches(&live, &desired));
        live.max_age = Duration::from_secs(60);
        assert!(stream_matches(&live, &desired));

        // Any load-bearing setting breaks the match.
        let mut resubjected = desired.clone();
        resubjected.subjects = vec!["jobs.other".to_string()];
        assert!(!stream_matches(&resubjected, &desired));

        let mut rescaled = desired.clone();
        rescaled.num_replicas = 3;
        assert!(!stream_matches(&rescaled, &desired));
    }
}
