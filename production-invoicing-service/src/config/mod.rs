//! Configuration module for production-invoicing-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProductionInvoicingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub accounting: AccountingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// External accounting sync. An empty `api_url` disables pushing; jobs are
/// still queued and skipped by the worker.
#[derive(Debug, Clone)]
pub struct AccountingConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub max_retry: Duration,
    pub queue_size: usize,
}

impl AccountingConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_url.is_empty()
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            timeout: Duration::from_secs(10),
            max_retry: Duration::from_secs(30),
            queue_size: 256,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ProductionInvoicingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = AccountingConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "production-invoicing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            accounting: AccountingConfig {
                api_url: env::var("ACCOUNTING_API_URL").unwrap_or_default(),
                timeout: Duration::from_secs(env_or(
                    "ACCOUNTING_TIMEOUT_SECS",
                    defaults.timeout.as_secs(),
                )),
                max_retry: Duration::from_secs(env_or(
                    "ACCOUNTING_MAX_RETRY_SECS",
                    defaults.max_retry.as_secs(),
                )),
                queue_size: env_or("SYNC_QUEUE_SIZE", defaults.queue_size),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting_disabled_without_url() {
        let config = AccountingConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.queue_size, 256);
    }
}
