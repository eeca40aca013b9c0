pub mod datasets;
pub mod jobs;
pub mod reports;

use crate::config::DatabaseConfig;
use crate::errors::PipelineError;
use crate::observability::update_database_pool_stats;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn initialize_pool(config: &DatabaseConfig) -> Result<Pool<Postgres>, PipelineError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(false) // Skip pre-acquire health check for lower latency
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Session-level timeouts guard against runaway queries and idle transactions
                sqlx::query("SET statement_timeout = '30s'")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("SET idle_in_transaction_session_timeout = '60s'")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    // Both processes run migrations at startup; sqlx serializes concurrent
    // runs with an advisory lock, so there is no deploy-order coupling.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let pool_clone = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let size = pool_clone.size() as u64;
            let num_idle = pool_clone.num_idle() as u64;
            let active = size.saturating_sub(num_idle);
            update_database_pool_stats(size, active, num_idle);
        }
    });

    Ok(pool)
}
