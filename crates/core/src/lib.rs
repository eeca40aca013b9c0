pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod nats;
pub mod observability;
pub mod postgres;
pub mod retry;
pub mod storage;
pub mod worker;
