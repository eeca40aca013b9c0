//! Worker runtime: telemetry bootstrap plus the JetStream consume loop.
//!
//! Concurrency is permit-gated: the loop does not pull the next delivery
//! until a job slot is free, so the local semaphore and the consumer's
//! max_ack_pending are the only backpressure mechanisms. Handlers are
//! expected to drive their job to a terminal state (or detect a duplicate
//! delivery) and return Ok; an Err means no terminal state could be
//! recorded, and the delivery is NAK'd back to the broker until the
//! consumer's max_deliver runs out.

use anyhow::Result;
use async_nats::jetstream::{
    AckKind,
    consumer::{Consumer, pull::Config},
};
use futures_util::StreamExt;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::{
    EnvFilter, Registry as TracingRegistry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{NatsConfig, ObservabilityConfig};
use crate::observability;

/// Delay before a delivery whose handler failed becomes visible again.
const REDELIVERY_DELAY: Duration = Duration::from_secs(30);
/// How long shutdown waits for in-flight jobs before giving up on them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for worker initialization
pub struct WorkerConfig {
    pub service_name: String,
    pub stream_name: String,
    pub consumer_config: Config,
    pub max_concurrent_jobs: usize,
    /// Maximum number of delivery attempts before a message is dropped
    pub max_deliver: u64,
    pub nats_config: NatsConfig,
}

/// Shared clients handed to every job invocation.
#[derive(Clone)]
pub struct WorkerContext {
    pub s3_client: aws_sdk_s3::Client,
    pub nats_client: async_nats::Client,
    pub pg_pool: sqlx::Pool<sqlx::Postgres>,
}

/// Initialize OpenTelemetry and the tracing subscriber for a worker process.
pub fn initialize_opentelemetry(config: &ObservabilityConfig) -> Result<()> {
    let logger_provider =
        observability::build_otel_providers(&config.service_name, &config.otlp_endpoint)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let tracer = global::tracer_provider().tracer(config.service_name.clone());
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    TracingRegistry::default()
        .with(env_filter)
        .with(observability::format_layer(&config.log_format))
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .try_init()?;

    Ok(())
}

/// Consume job messages until a shutdown signal arrives, then drain.
pub async fn run_worker<J, F, Fut>(
    config: WorkerConfig,
    context: WorkerContext,
    process_job: F,
) -> Result<()>
where
    J: DeserializeOwned + Send + 'static,
    F: Fn(J, WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    crate::nats::initialize_jetstream(&context.nats_client, &config.nats_config).await?;

    let jetstream = async_nats::jetstream::new(context.nats_client.clone());
    let consumer = crate::nats::ensure_consumer(
        &jetstream,
        &config.stream_name,
        config.consumer_config.clone(),
    )
    .await?;

    // The signal task flips the watch once; the consume loop observes it at
    // its next suspension point.
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    let result =
        consume_deliveries(consumer, &config, context, slots.clone(), process_job, stop_rx).await;

    observability::set_worker_ready(&config.service_name, false);

    // Every running job holds one slot, so getting the whole set back means
    // the last of them has finished.
    let all_slots = slots.acquire_many(config.max_concurrent_jobs as u32);
    match tokio::time::timeout(DRAIN_TIMEOUT, all_slots).await {
        Ok(_) => info!("In-flight jobs drained, worker stopped"),
        Err(_) => warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Drain window elapsed, stopping with jobs still in flight"
        ),
    }

    result
}

async fn consume_deliveries<J, F, Fut>(
    consumer: Consumer<Config>,
    config: &WorkerConfig,
    context: WorkerContext,
    slots: Arc<Semaphore>,
    process_job: F,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    J: DeserializeOwned + Send + 'static,
    F: Fn(J, WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    let process_job = Arc::new(process_job);
    let mut deliveries = consumer.messages().await?;

    observability::set_worker_ready(&config.service_name, true);
    info!(
        stream = %config.stream_name,
        max_concurrent = config.max_concurrent_jobs,
        "Worker consuming"
    );

    loop {
        // A free slot is a precondition for pulling at all.
        let slot = tokio::select! {
            _ = stop.changed() => break,
            slot = slots.clone().acquire_owned() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };

        let next = tokio::select! {
            _ = stop.changed() => break,
            next = deliveries.next() => next,
        };
        let Some(next) = next else {
            warn!("Delivery stream ended");
            break;
        };
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Could not pull the next delivery");
                continue;
            }
        };

        let attempt = msg.info().map(|info| info.delivered.max(1) as u64).unwrap_or(1);

        let job: J = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                // A payload that never decodes would otherwise redeliver forever.
                warn!(error = %e, "Discarding undecodable message");
                if let Err(ack_err) = msg.ack().await {
                    warn!(error = %ack_err, "Failed to discard undecodable message");
                }
                continue;
            }
        };

        let span = info_span!("worker_job", stream = %config.stream_name, attempt);
        let handler = Arc::clone(&process_job);
        let ctx = context.clone();
        let worker = config.stream_name.clone();
        let max_deliver = config.max_deliver;

        tokio::spawn(
            async move {
                let _slot = slot;

                let disposition = match handler(job, ctx).await {
                    Ok(()) => AckKind::Ack,
                    Err(e) if attempt >= max_deliver => {
                        // The claim CAS keeps a later manual replay safe;
                        // discarding only ends the redelivery loop.
                        error!(
                            error = %format!("{e:#}"),
                            attempt,
                            "No terminal state after the final delivery, discarding"
                        );
                        AckKind::Ack
                    }
                    Err(e) => {
                        warn!(
                            error = %format!("{e:#}"),
                            attempt,
                            max_deliver,
                            "Handler did not reach a terminal state, requeueing"
                        );
                        observability::record_worker_job_retry(&worker, attempt as u32);
                        AckKind::Nak(Some(REDELIVERY_DELAY))
                    }
                };

                if let Err(e) = msg.ack_with(disposition).await {
                    warn!(error = %e, "Acknowledgement failed, the broker will redeliver");
                }
            }
            .instrument(span),
        );
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, watching SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            info!("SIGINT received, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Ctrl+C received, shutting down");
    }
}
