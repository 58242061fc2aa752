//! Prometheus metrics for oracle observability.
//!
//! # Metrics Families
//!
//! | Metric | Type | Description | Labels |
//! |--------|------|-------------|--------|
//! | `tso_oracle_events_total` | Counter | Oracle state-transition events | `event` |
//! | `tso_oracle_physical_ms` | Gauge | Published physical time (ms since epoch) |  |
//!
//! Event labels are the static constants in [`events`]; they mirror the
//! oracle's observable transitions (sync outcomes, save skips and failures,
//! clock diagnostics, logical overflow, reset outcomes).

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Oracle event labels recorded under `tso_oracle_events_total`.
pub mod events {
    /// A sync was started.
    pub const SYNC: &str = "sync";
    /// A sync completed and published a window.
    pub const SYNC_OK: &str = "sync_ok";
    /// The save during sync failed.
    pub const ERR_SAVE_SYNC: &str = "err_save_sync_ts";
    /// An advance tick ran.
    pub const SAVE: &str = "save";
    /// An advance tick decided no movement was needed.
    pub const SKIP_SAVE: &str = "skip_save";
    /// The published physical lags the wall clock by more than three steps.
    pub const SLOW_SAVE: &str = "slow_save";
    /// The wall clock is behind the published physical.
    pub const SYSTEM_TIME_SLOW: &str = "system_time_slow";
    /// The save during an advance failed.
    pub const ERR_SAVE_UPDATE: &str = "err_save_update_ts";
    /// The logical counter overflowed within one physical millisecond.
    pub const LOGICAL_OVERFLOW: &str = "logical_overflow";
    /// An operator reset was rejected because leadership was lost.
    pub const ERR_LEASE_RESET: &str = "err_lease_reset_ts";
    /// An operator reset was rejected as too small.
    pub const ERR_RESET_SMALL: &str = "err_reset_small_ts";
    /// An operator reset was rejected as too large.
    pub const ERR_RESET_LARGE: &str = "err_reset_large_ts";
    /// The save during an operator reset failed.
    pub const ERR_SAVE_RESET: &str = "err_save_reset_ts";
    /// An operator reset was applied.
    pub const RESET_TSO_OK: &str = "reset_tso_ok";
}

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Oracle metrics registered against a shared Prometheus registry.
///
/// # Thread Safety
///
/// All metrics use interior mutability; the struct is `Clone`, `Send`, and
/// `Sync`.
#[derive(Clone)]
pub struct OracleMetrics {
    /// Oracle events, labeled by `event`.
    events_total: IntCounterVec,

    /// Published physical time in milliseconds since the epoch.
    physical_ms: IntGauge,
}

impl OracleMetrics {
    /// Creates oracle metrics and registers them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register.
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let events_total = IntCounterVec::new(
            Opts::new("tso_oracle_events_total", "Oracle state-transition events"),
            &["event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let physical_ms = IntGauge::new(
            "tso_oracle_physical_ms",
            "Published physical time in milliseconds since the Unix epoch",
        )?;
        registry.register(Box::new(physical_ms.clone()))?;

        Ok(Self {
            events_total,
            physical_ms,
        })
    }

    /// Records an oracle event; `event` is one of the [`events`] constants.
    pub fn event(&self, event: &str) {
        self.events_total.with_label_values(&[event]).inc();
    }

    /// Records the published physical time.
    pub fn set_physical_ms(&self, physical_ms: i64) {
        self.physical_ms.set(physical_ms);
    }

    /// Returns the count for an event. Test helper.
    #[must_use]
    pub fn event_count(&self, event: &str) -> u64 {
        self.events_total.with_label_values(&[event]).get()
    }
}

/// Metrics registry wrapper holding the Prometheus registry and the oracle
/// metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    oracle: OracleMetrics,
}

impl MetricsRegistry {
    /// Creates a new registry with the oracle metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let oracle = OracleMetrics::new(&registry)?;
        Ok(Self { registry, oracle })
    }

    /// Returns the oracle metrics.
    #[must_use]
    pub const fn oracle(&self) -> &OracleMetrics {
        &self.oracle
    }

    /// Encodes all metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

/// Shared metrics registry for use across the daemon.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;
