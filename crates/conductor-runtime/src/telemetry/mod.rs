//! Telemetry and logging setup for the Conductor runtime

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Call once from the host
/// binary; library code never installs a subscriber itself.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.clone().into());

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    result.map_err(|e| ConfigError::Tracing(e.to_string()))
}

/// Counter identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    SequencesMounted,
    PlaysStarted,
    PlaysSucceeded,
    PlaysFailed,
    BeatsExecuted,
    GateViolations,
    PublishesDispatched,
    PublishesSuppressed,
    BusSubscriberFailures,
}

/// Runtime counters, lock-free so hot paths never contend
pub struct ConductorTelemetry {
    config: TelemetryConfig,
    sequences_mounted: AtomicU64,
    plays_started: AtomicU64,
    plays_succeeded: AtomicU64,
    plays_failed: AtomicU64,
    beats_executed: AtomicU64,
    gate_violations: AtomicU64,
    publishes_dispatched: AtomicU64,
    publishes_suppressed: AtomicU64,
    bus_subscriber_failures: AtomicU64,
}

impl ConductorTelemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            config: config.clone(),
            sequences_mounted: AtomicU64::new(0),
            plays_started: AtomicU64::new(0),
            plays_succeeded: AtomicU64::new(0),
            plays_failed: AtomicU64::new(0),
            beats_executed: AtomicU64::new(0),
            gate_violations: AtomicU64::new(0),
            publishes_dispatched: AtomicU64::new(0),
            publishes_suppressed: AtomicU64::new(0),
            bus_subscriber_failures: AtomicU64::new(0),
        }
    }

    pub fn increment(&self, counter: Counter) {
        if !self.config.enabled || !self.config.metrics_enabled {
            return;
        }
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::SequencesMounted => &self.sequences_mounted,
            Counter::PlaysStarted => &self.plays_started,
            Counter::PlaysSucceeded => &self.plays_succeeded,
            Counter::PlaysFailed => &self.plays_failed,
            Counter::BeatsExecuted => &self.beats_executed,
            Counter::GateViolations => &self.gate_violations,
            Counter::PublishesDispatched => &self.publishes_dispatched,
            Counter::PublishesSuppressed => &self.publishes_suppressed,
            Counter::BusSubscriberFailures => &self.bus_subscriber_failures,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            sequences_mounted: self.get(Counter::SequencesMounted),
            plays_started: self.get(Counter::PlaysStarted),
            plays_succeeded: self.get(Counter::PlaysSucceeded),
            plays_failed: self.get(Counter::PlaysFailed),
            beats_executed: self.get(Counter::BeatsExecuted),
            gate_violations: self.get(Counter::GateViolations),
            publishes_dispatched: self.get(Counter::PublishesDispatched),
            publishes_suppressed: self.get(Counter::PublishesSuppressed),
            bus_subscriber_failures: self.get(Counter::BusSubscriberFailures),
        }
    }
}

impl Default for ConductorTelemetry {
    fn default() -> Self {
        Self::new(&TelemetryConfig::default())
    }
}

/// Point-in-time copy of the runtime counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub sequences_mounted: u64,
    pub plays_started: u64,
    pub plays_succeeded: u64,
    pub plays_failed: u64,
    pub beats_executed: u64,
    pub gate_violations: u64,
    pub publishes_dispatched: u64,
    pub publishes_suppressed: u64,
    pub bus_subscriber_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let telemetry = ConductorTelemetry::default();
        telemetry.increment(Counter::PlaysStarted);
        telemetry.increment(Counter::PlaysStarted);
        telemetry.increment(Counter::GateViolations);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.plays_started, 2);
        assert_eq!(snapshot.gate_violations, 1);
        assert_eq!(snapshot.plays_failed, 0);
    }

    #[test]
    fn test_disabled_metrics_do_not_count() {
        let telemetry = ConductorTelemetry::new(&TelemetryConfig {
            enabled: true,
            metrics_enabled: false,
        });
        telemetry.increment(Counter::BeatsExecuted);
        assert_eq!(telemetry.get(Counter::BeatsExecuted), 0);
    }
}
