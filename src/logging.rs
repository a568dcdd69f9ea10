//! Structured logging setup.
//!
//! Logs go to stderr so that command output on stdout (tables, `--json`)
//! stays machine-readable. `RUST_LOG` overrides `[logging] filter`.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| anyhow::anyhow!("invalid logging.filter '{}': {}", config.filter, e))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_is_reported() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let cfg = LoggingConfig {
            filter: "harvester=notalevel".to_string(),
            format: "compact".to_string(),
        };
        assert!(init(&cfg).is_err());
    }

    #[test]
    fn second_init_is_harmless() {
        let cfg = LoggingConfig::default();
        init(&cfg).unwrap();
        init(&cfg).unwrap();
    }
}
