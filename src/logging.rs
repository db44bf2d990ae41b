//! Logging configuration and subscriber setup.

use serde::Deserialize;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// `json` or `pretty`.
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".into()
}

fn default_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        match self.format.as_str() {
            "json" | "pretty" => {}
            other => return Err(("logging.format", format!("expected json or pretty, got {other}"))),
        }
        if EnvFilter::try_new(&self.level).is_err() {
            return Err(("logging.level", format!("invalid filter {:?}", self.level)));
        }
        Ok(())
    }

    /// Installs the global subscriber. `RUST_LOG` wins over the configured
    /// level. Output goes to stderr; stdout carries predictions.
    /// Fails, leaving the installed one in place, when a global subscriber
    /// already exists.
    pub fn init(&self) -> Result<(), TryInitError> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish()
                .try_init(),
            _ => fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish()
                .try_init(),
        }
    }
}
