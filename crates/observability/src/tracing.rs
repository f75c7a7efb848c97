//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::LogConfig;

/// Build the filter: `RUST_LOG` wins, then the configured directive.
pub fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(config: &LogConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if installed.is_ok() {
        ::tracing::debug!(filter = %config.filter, json = config.json, "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_harmless() {
        init(&LogConfig::default());
        init(&LogConfig {
            filter: "debug".into(),
            json: false,
        });
    }

    #[test]
    fn invalid_directives_fall_back_to_info() {
        let config = LogConfig {
            filter: "[[not a filter".into(),
            json: true,
        };
        // Must not panic.
        let _ = filter(&config);
    }
}
