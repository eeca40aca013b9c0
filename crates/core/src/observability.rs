//! Metrics and telemetry initialization shared by both processes.
//!
//! The API process exposes HTTP metrics through `actix-web-prom` on
//! `/metrics`; everything else (database, storage, worker instruments and
//! traces/logs) is exported over OTLP.

use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use anyhow::Result;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge, Histogram, Meter},
    trace::TracerProvider,
};
use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    logs::SdkLoggerProvider,
    metrics::SdkMeterProvider,
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use std::{sync::OnceLock, time::Duration};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, ObservabilityConfig};

struct Metrics {
    database_queries_total: Counter<u64>,
    database_query_duration: Histogram<f64>,
    database_pool_size: Gauge<f64>,
    database_pool_active: Gauge<f64>,
    database_pool_idle: Gauge<f64>,
    storage_operations_total: Counter<u64>,
    storage_operation_duration: Histogram<f64>,
    storage_file_size_bytes: Histogram<f64>,
    worker_ready: Gauge<f64>,
    worker_jobs_total: Counter<u64>,
    worker_job_duration: Histogram<f64>,
    worker_job_failures_total: Counter<u64>,
    worker_job_retries_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            database_queries_total: meter
                .u64_counter("database_queries_total")
                .with_description("Total number of database queries")
                .build(),
            database_query_duration: meter
                .f64_histogram("database_query_duration_seconds")
                .with_description("Database query duration in seconds")
                .build(),
            database_pool_size: meter
                .f64_gauge("database_pool_size")
                .with_description("Total connections in the database pool")
                .build(),
            database_pool_active: meter
                .f64_gauge("database_pool_active")
                .with_description("Connections currently checked out of the pool")
                .build(),
            database_pool_idle: meter
                .f64_gauge("database_pool_idle")
                .with_description("Idle connections in the database pool")
                .build(),
            storage_operations_total: meter
                .u64_counter("storage_operations_total")
                .with_description("Total number of object store operations")
                .build(),
            storage_operation_duration: meter
                .f64_histogram("storage_operation_duration_seconds")
                .with_description("Object store operation duration in seconds")
                .build(),
            storage_file_size_bytes: meter
                .f64_histogram("storage_file_size_bytes")
                .with_description("Size of objects moved to/from the object store")
                .build(),
            worker_ready: meter
                .f64_gauge("worker_ready")
                .with_description("Whether the worker is consuming (1) or not (0)")
                .build(),
            worker_jobs_total: meter
                .u64_counter("worker_jobs_total")
                .with_description("Total number of worker jobs by outcome")
                .build(),
            worker_job_duration: meter
                .f64_histogram("worker_job_duration_seconds")
                .with_description("Worker job duration in seconds")
                .build(),
            worker_job_failures_total: meter
                .u64_counter("worker_job_failures_total")
                .with_description("Total number of failed worker jobs by error kind")
                .build(),
            worker_job_retries_total: meter
                .u64_counter("worker_job_retries_total")
                .with_description("Total number of worker job retry attempts")
                .build(),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn init_metrics() {
    let _ = METRICS.set(Metrics::new(global::meter("dataset-profiler")));
}

pub fn record_database_query(operation: &str, table: &str, duration_secs: f64, success: bool) {
    let Some(metrics) = metrics() else { return };
    let status = if success { "success" } else { "error" };
    let attributes = [
        KeyValue::new("operation", operation.to_string()),
        KeyValue::new("table", table.to_string()),
        KeyValue::new("status", status.to_string()),
    ];

    metrics.database_queries_total.add(1, &attributes);
    metrics
        .database_query_duration
        .record(duration_secs, &attributes);
}

pub fn record_storage_operation(
    operation: &str,
    duration_secs: f64,
    file_size_bytes: Option<u64>,
    success: bool,
) {
    let Some(metrics) = metrics() else { return };
    let status = if success { "success" } else { "error" };
    let attributes = [
        KeyValue::new("operation", operation.to_string()),
        KeyValue::new("status", status.to_string()),
    ];

    metrics.storage_operations_total.add(1, &attributes);
    metrics
        .storage_operation_duration
        .record(duration_secs, &attributes);

    if let Some(size) = file_size_bytes {
        metrics.storage_file_size_bytes.record(
            size as f64,
            &[KeyValue::new("operation", operation.to_string())],
        );
    }
}

pub fn record_worker_job(worker: &str, duration_secs: f64, status: &str) {
    let Some(metrics) = metrics() else { return };
    let attributes = [
        KeyValue::new("worker", worker.to_string()),
        KeyValue::new("status", status.to_string()),
    ];

    metrics.worker_jobs_total.add(1, &attributes);
    metrics
        .worker_job_duration
        .record(duration_secs, &attributes);
}

pub fn record_worker_job_failure(worker: &str, error_kind: &str) {
    let Some(metrics) = metrics() else { return };
    metrics.worker_job_failures_total.add(
        1,
        &[
            KeyValue::new("worker", worker.to_string()),
            KeyValue::new("error_kind", error_kind.to_string()),
        ],
    );
}

pub fn record_worker_job_retry(worker: &str, attempt: u32) {
    let Some(metrics) = metrics() else { return };
    metrics.worker_job_retries_total.add(
        1,
        &[
            KeyValue::new("worker", worker.to_string()),
            KeyValue::new("attempt", attempt.to_string()),
        ],
    );
}

pub fn set_worker_ready(worker: &str, ready: bool) {
    let Some(metrics) = metrics() else { return };
    let value = if ready { 1.0 } else { 0.0 };
    metrics
        .worker_ready
        .record(value, &[KeyValue::new("worker", worker.to_string())]);
}

pub fn update_database_pool_stats(size: u64, active: u64, idle: u64) {
    let Some(metrics) = metrics() else { return };
    metrics.database_pool_size.record(size as f64, &[]);
    metrics.database_pool_active.record(active as f64, &[]);
    metrics.database_pool_idle.record(idle as f64, &[]);
}

/// Set up the global OTLP providers (traces, logs, metrics) and return the
/// logger provider for bridging into the tracing subscriber.
pub(crate) fn build_otel_providers(
    service_name: &str,
    otlp_endpoint: &str,
) -> Result<SdkLoggerProvider> {
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let trace_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .with_resource(resource.clone())
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .build();
    global::set_tracer_provider(tracer_provider);

    let metric_exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .with_resource(resource.clone())
        .build();
    global::set_meter_provider(meter_provider);

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource)
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());
    init_metrics();

    Ok(logger_provider)
}

pub(crate) fn format_layer<S>(log_format: &LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .with_file(true)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    }
}

/// Initialize telemetry for the API process and build the Prometheus
/// middleware that serves HTTP metrics on `/metrics`.
pub fn init_observability_api(
    service_prefix: &str,
    config: &ObservabilityConfig,
) -> Result<PrometheusMetrics> {
    let logger_provider = build_otel_providers(&config.service_name, &config.otlp_endpoint)?;

    let prometheus = PrometheusMetricsBuilder::new(service_prefix)
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let tracer = global::tracer_provider().tracer(config.service_name.clone());
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    Registry::default()
        .with(env_filter)
        .with(format_layer(&config.log_format))
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .try_init()?;

    Ok(prometheus)
}
