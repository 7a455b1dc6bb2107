//! Configuration for the Conductor runtime

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sequence engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Field injected into every beat's input carrying the play's correlation id
    #[serde(default = "default_correlation_key")]
    pub correlation_key: String,
    /// Emit a debug event for every beat executed
    #[serde(default)]
    pub trace_beats: bool,
    /// Subscribe `events.triggers` on the bus when a sequence is mounted
    #[serde(default = "default_true")]
    pub subscribe_triggers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            correlation_key: default_correlation_key(),
            trace_beats: false,
            subscribe_triggers: true,
        }
    }
}

/// Topic router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum remembered fingerprints per deduplicated topic
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dedupe_capacity: default_dedupe_capacity(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Log when a topic is published with nobody listening
    #[serde(default)]
    pub warn_on_empty_publish: bool,
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_enabled: true,
        }
    }
}

/// Logging configuration consumed by [`crate::telemetry::init_tracing`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_correlation_key() -> String {
    "correlationId".to_string()
}

fn default_dedupe_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ConductorConfig {
    /// Load configuration: defaults, then an optional file, then `CONDUCTOR_*`
    /// environment variables (`CONDUCTOR_ENGINE__TRACE_BEATS=true`).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ConductorConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Verbose beat tracing and debug logging
    pub fn development() -> Self {
        Self {
            engine: EngineConfig {
                trace_beats: true,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
            ..Default::default()
        }
    }

    /// JSON logs, no per-beat tracing
    pub fn production() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                json: true,
            },
            ..Default::default()
        }
    }
}
