//! Service configuration.
//!
//! Layered, later layers win:
//! 1. defaults in code
//! 2. `config/stockroom.{toml,yaml,json}` if present
//! 3. environment variables, e.g. `STOCKROOM_RETRY__MAX_ATTEMPTS=12`

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use stockroom_inventory::RecordSettings;
use stockroom_observability::LogConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockConfig {
    pub retry: RetryConfig,
    pub defaults: RecordDefaults,
    /// Absent when running on the in-memory stores.
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// Optimistic-concurrency retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Total tries per operation, including the first.
    pub max_attempts: u32,
    /// Sleep before retry `n` is `backoff_ms * n`.
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Thresholds given to records created without explicit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RecordDefaults {
    pub low_stock_threshold: u64,
    pub reorder_quantity: u64,
}

impl RecordDefaults {
    pub fn settings(&self) -> RecordSettings {
        RecordSettings {
            low_stock_threshold: self.low_stock_threshold,
            reorder_quantity: self.reorder_quantity,
            ..RecordSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl StockConfig {
    /// Builder preloaded with the in-code defaults.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("retry.max_attempts", 8)?
            .set_default("retry.backoff_ms", 2)?
            .set_default("defaults.low_stock_threshold", 5)?
            .set_default("defaults.reorder_quantity", 10)?
            .set_default("log.filter", "info")?
            .set_default("log.json", true)
    }

    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::with_name("config/stockroom").required(false))
            .add_source(
                Environment::with_prefix("STOCKROOM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 8,
                backoff_ms: 2,
            },
            defaults: RecordDefaults {
                low_stock_threshold: 5,
                reorder_quantity: 10,
            },
            database: None,
            log: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> StockConfig {
        StockConfig::defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn code_defaults_match_default_impl() {
        assert_eq!(from_toml(""), StockConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = from_toml(
            r#"
            [retry]
            max_attempts = 20

            [defaults]
            reorder_quantity = 48

            [database]
            url = "postgres://localhost/stockroom"

            [log]
            json = false
            "#,
        );

        assert_eq!(config.retry.max_attempts, 20);
        assert_eq!(config.retry.backoff_ms, 2);
        assert_eq!(config.defaults.settings().reorder_quantity, 48);
        assert_eq!(config.defaults.settings().low_stock_threshold, 5);
        assert_eq!(config.database.map(|d| d.max_connections), Some(10));
        assert!(!config.log.json);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn backoff_grows_linearly() {
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 5,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(5));
        assert_eq!(retry.backoff(3), Duration::from_millis(15));
    }
}
