//! Centralized configuration management.
//!
//! All configuration is loaded from environment variables at startup.
//! This provides a single source of truth and fails fast if required config is missing.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub s3: S3Config,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
    pub worker: WorkerConfig,
    pub limits: ProfileLimits,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// NATS configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub replicas: u32,
}

/// S3-compatible storage configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    /// Optional access key ID for static credentials
    /// If None, the AWS SDK will use the default credential provider chain
    pub access_key_id: Option<String>,
    /// Optional secret access key for static credentials
    pub secret_access_key: Option<String>,
    pub endpoint_url: String,
    /// Bucket holding raw dataset uploads
    pub uploads_bucket: String,
    /// Bucket holding generated profile reports
    pub reports_bucket: String,
    /// Maximum accepted upload size (in bytes)
    /// Should match the server's multipart form limits
    pub max_upload_size_bytes: usize,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub shutdown_timeout_secs: Option<u64>,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub otlp_endpoint: String,
    pub log_format: LogFormat,
}

/// Log format type
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Worker and retry configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently by one worker process
    pub max_concurrent_jobs: usize,
    /// Maximum broker delivery attempts per message
    pub max_deliver: i64,
    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Duration,
}

/// Bounds on payloads the profiler will materialize
#[derive(Debug, Clone)]
pub struct ProfileLimits {
    pub max_rows: usize,
    pub max_payload_bytes: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// This should be called once at application startup.
    /// It will fail fast if required configuration is missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            nats: NatsConfig::from_env()?,
            s3: S3Config::from_env()?,
            server: ServerConfig::from_env()?,
            observability: ObservabilityConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
            limits: ProfileLimits::from_env()?,
        })
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be a number")?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("DB_MIN_CONNECTIONS must be a number")?,
            acquire_timeout: Duration::from_secs(
                env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("DB_ACQUIRE_TIMEOUT_SECS must be a number")?,
            ),
            idle_timeout: Duration::from_secs(
                env::var("DB_IDLE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("DB_IDLE_TIMEOUT_SECS must be a number")?,
            ),
            max_lifetime: Duration::from_secs(
                env::var("DB_MAX_LIFETIME_SECS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()
                    .context("DB_MAX_LIFETIME_SECS must be a number")?,
            ),
        })
    }
}

impl NatsConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            replicas: env::var("NATS_REPLICAS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("NATS_REPLICAS must be a number")?,
        })
    }
}

impl S3Config {
    pub fn from_env() -> Result<Self> {
        // Default upload cap: 100MB. Uploads are profiled in memory, so the
        // cap bounds worker memory as well as request size.
        let default_max_upload = (100 * 1024 * 1024).to_string();

        // Credentials are optional to support IAM roles, instance profiles, etc.
        let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();

        Ok(Self {
            region: env::var("AWS_REGION").context("AWS_REGION is required")?,
            access_key_id,
            secret_access_key,
            endpoint_url: env::var("AWS_ENDPOINT_URL").context("AWS_ENDPOINT_URL is required")?,
            uploads_bucket: env::var("UPLOADS_BUCKET").unwrap_or_else(|_| "uploads".to_string()),
            reports_bucket: env::var("REPORTS_BUCKET").unwrap_or_else(|_| "reports".to_string()),
            max_upload_size_bytes: env::var("MAX_UPLOAD_SIZE_BYTES")
                .unwrap_or(default_max_upload)
                .parse()
                .context("MAX_UPLOAD_SIZE_BYTES must be a number")?,
        })
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().to_string())
            .collect();

        let shutdown_timeout_secs = env::var("SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            hostname: env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a number")?,
            cors_allowed_origins: cors_origins,
            shutdown_timeout_secs,
        })
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "json".to_string())
            .to_lowercase()
            .as_str()
        {
            "pretty" | "human" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Ok(Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "dataset-profiler".to_string()),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            log_format,
        })
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_concurrent_jobs: env::var("WORKER_MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("WORKER_MAX_CONCURRENT_JOBS must be a number")?,
            max_deliver: env::var("WORKER_MAX_DELIVER")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("WORKER_MAX_DELIVER must be a number")?,
            ack_wait: Duration::from_secs(
                env::var("WORKER_ACK_WAIT_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .context("WORKER_ACK_WAIT_SECS must be a number")?,
            ),
        })
    }
}

impl ProfileLimits {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_rows: env::var("PROFILE_MAX_ROWS")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()
                .context("PROFILE_MAX_ROWS must be a number")?,
            max_payload_bytes: env::var("PROFILE_MAX_PAYLOAD_BYTES")
                .unwrap_or_else(|_| (100 * 1024 * 1024).to_string())
                .parse()
                .context("PROFILE_MAX_PAYLOAD_BYTES must be a number")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_defaults_to_json() {
        let config = ObservabilityConfig {
            service_name: "test".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            log_format: LogFormat::Json,
        };
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_profile_limits_defaults() {
        // Only read when the env vars are unset in the test environment.
        let limits = ProfileLimits::from_env().expect("defaults must parse");
        assert!(limits.max_rows > 0);
        assert!(limits.max_payload_bytes > 0);
    }
}
