use anyhow::{Context, Result};
use std::env;

use crate::services::queue_service;

pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// 64-char hex key for the stored-secret cipher. Lives only in the
    /// environment, never in the database.
    pub encryption_key: String,
    pub worker_interval_secs: u64,
    pub worker_batch_size: i64,
    pub smtp_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://mailgate.db".into());
        let encryption_key = env::var("MAILGATE_ENCRYPTION_KEY")
            .context("MAILGATE_ENCRYPTION_KEY must be set (64 hex chars)")?;
        let port = env_or("PORT", 3030)?;
        let worker_interval_secs = env_or("WORKER_INTERVAL_SECS", 60)?;
        let worker_batch_size = env_or("WORKER_BATCH_SIZE", queue_service::DEFAULT_BATCH_SIZE)?;
        let smtp_timeout_secs = env_or("SMTP_TIMEOUT_SECS", 30)?;

        Ok(Config {
            database_url,
            port,
            encryption_key,
            worker_interval_secs,
            worker_batch_size,
            smtp_timeout_secs,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
