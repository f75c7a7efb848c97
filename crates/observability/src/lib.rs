//! Tracing/logging setup shared by every process embedding the stock core.

use serde::Deserialize;

/// Tracing configuration (filters, output format).
pub mod tracing;

/// Log output settings, usually read from the `log` section of the service config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// JSON lines (true) or human-readable output (false).
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: true,
        }
    }
}

/// Initialize process-wide observability with default settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LogConfig::default());
}

/// Initialize process-wide observability from explicit settings.
pub fn init_with(config: &LogConfig) {
    tracing::init(config);
}
