//! Logging initialization for binaries embedding the guard
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. This helper covers the common case of
//! stderr output, plain or JSON.
//!
//! ```rust,no_run
//! use hookguard_auth::logging::LoggingConfig;
//!
//! LoggingConfig { level: "info,audit::auth=info".into(), json: true }.init()?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::io;

use serde::Deserialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Subscriber settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit one JSON object per event
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global subscriber writing to stderr
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already set.
    pub fn init(&self) -> io::Result<()> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let subscriber = tracing_subscriber::registry().with(filter);

        if self.json {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        } else {
            subscriber
                .with(fmt::layer().with_target(true).with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        // The first call may lose to another test
        let _ = config.init();
        assert!(config.init().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: LoggingConfig = serde_json::from_str(r#"{"json":true}"#).unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
    }
}
