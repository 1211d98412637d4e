//! Structured logging setup.
//!
//! PowerStream's own crates log at `service_level`; everything else (sqlx,
//! tokio internals) stays at `level`. `RUST_LOG`, when set, replaces both.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing targets that follow `service_level`.
pub const SERVICE_TARGETS: [&str; 3] = ["powerstream_core", "powerstream_storage", "powerstream_service"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for third-party targets
    #[serde(default = "default_level")]
    pub level: String,
    /// Level for the `powerstream_*` targets
    #[serde(default = "default_service_level")]
    pub service_level: String,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "warn".to_string()
}

fn default_service_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            service_level: default_service_level(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives, e.g. `"warn,powerstream_core=info,..."`.
    pub fn directives(&self) -> String {
        SERVICE_TARGETS
            .iter()
            .fold(self.level.clone(), |mut acc, target| {
                acc.push_str(&format!(",{target}={}", self.service_level));
                acc
            })
    }

    fn filter(&self) -> EnvFilter {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_tracing(config: &LogConfig) {
    let filter = config.filter();

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_crates_log_at_service_level() {
        let config = LogConfig::default();
        assert_eq!(
            config.directives(),
            "warn,powerstream_core=info,powerstream_storage=info,powerstream_service=info"
        );
    }

    #[test]
    fn service_level_is_independent_of_global_level() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level":"error","service_level":"trace"}"#).unwrap();
        assert!(config.directives().starts_with("error,"));
        assert!(config.directives().ends_with("powerstream_service=trace"));
        assert!(EnvFilter::try_new(config.directives()).is_ok());
    }
}
