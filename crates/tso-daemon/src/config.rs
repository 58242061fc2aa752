//! Oracle and daemon configuration.
//!
//! [`OracleConfig`] owns every tunable the allocator reads, including the
//! save-ahead interval and the per-call retry budget; nothing is injected
//! per call and nothing lives in process-global state. [`DaemonConfig`] is
//! the binary-facing layer: a JSON file with serde defaults, with CLI
//! arguments layered on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Save-ahead window persisted ahead of the published physical time.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(3);

/// Minimum gap separating the allocator's physical time from either the
/// saved point or a previous physical time. This is a contract constant,
/// not a tunable.
pub const UPDATE_TIMESTAMP_GUARD: Duration = Duration::from_millis(1);

/// Cadence of the background advance tick.
pub const DEFAULT_UPDATE_STEP: Duration = Duration::from_millis(50);

/// Allocation retry budget.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 10;

/// Deadline applied to every durable store operation.
pub const DEFAULT_STORE_DEADLINE: Duration = Duration::from_secs(3);

/// Ceiling on operator-initiated forward resets.
pub const DEFAULT_MAX_RESET_GAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Wait between allocation attempts while a sync is still in flight.
pub const DEFAULT_SYNC_WAIT: Duration = Duration::from_millis(200);

/// Errors from loading daemon configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration owned by the oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Root path under which the `timestamp` and `leader` keys live.
    pub root_path: String,

    /// Identity this member writes under the leader key and that every
    /// durable save is conditioned on.
    pub member: String,

    /// Save-ahead window.
    pub save_interval: Duration,

    /// Background advance cadence.
    pub update_step: Duration,

    /// Allocation retry budget, read per call.
    pub max_retry_count: u32,

    /// Deadline for each durable store operation.
    pub store_deadline: Duration,

    /// Ceiling on operator-initiated forward resets.
    pub max_reset_gap: Duration,

    /// Wait between allocation attempts while sync is in flight.
    pub sync_wait: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            root_path: "tso".to_string(),
            member: "tso-0".to_string(),
            save_interval: DEFAULT_SAVE_INTERVAL,
            update_step: DEFAULT_UPDATE_STEP,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            store_deadline: DEFAULT_STORE_DEADLINE,
            max_reset_gap: DEFAULT_MAX_RESET_GAP,
            sync_wait: DEFAULT_SYNC_WAIT,
        }
    }
}

impl OracleConfig {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn builder() -> OracleConfigBuilder {
        OracleConfigBuilder::default()
    }
}

/// Builder for [`OracleConfig`].
#[derive(Debug, Default)]
pub struct OracleConfigBuilder {
    config: OracleConfig,
}

impl OracleConfigBuilder {
    /// Sets the storage root path.
    #[must_use]
    pub fn root_path(mut self, root: impl Into<String>) -> Self {
        self.config.root_path = root.into();
        self
    }

    /// Sets the member identity.
    #[must_use]
    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.config.member = member.into();
        self
    }

    /// Sets the save-ahead window.
    #[must_use]
    pub const fn save_interval(mut self, interval: Duration) -> Self {
        self.config.save_interval = interval;
        self
    }

    /// Sets the advance cadence.
    #[must_use]
    pub const fn update_step(mut self, step: Duration) -> Self {
        self.config.update_step = step;
        self
    }

    /// Sets the allocation retry budget.
    #[must_use]
    pub const fn max_retry_count(mut self, count: u32) -> Self {
        self.config.max_retry_count = count;
        self
    }

    /// Sets the durable store deadline.
    #[must_use]
    pub const fn store_deadline(mut self, deadline: Duration) -> Self {
        self.config.store_deadline = deadline;
        self
    }

    /// Sets the operator reset ceiling.
    #[must_use]
    pub const fn max_reset_gap(mut self, gap: Duration) -> Self {
        self.config.max_reset_gap = gap;
        self
    }

    /// Sets the in-sync allocation wait.
    #[must_use]
    pub const fn sync_wait(mut self, wait: Duration) -> Self {
        self.config.sync_wait = wait;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> OracleConfig {
        self.config
    }
}

fn default_root_path() -> String {
    "tso".to_string()
}

fn default_member() -> String {
    "tso-0".to_string()
}

fn default_save_interval_ms() -> u64 {
    DEFAULT_SAVE_INTERVAL.as_millis() as u64
}

fn default_update_step_ms() -> u64 {
    DEFAULT_UPDATE_STEP.as_millis() as u64
}

fn default_max_reset_gap_ms() -> u64 {
    DEFAULT_MAX_RESET_GAP.as_millis() as u64
}

fn default_metrics_port() -> u16 {
    9100
}

/// Daemon configuration loaded from a JSON file.
///
/// CLI arguments override individual fields; see the binary's `Args`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Storage root path for the oracle's keys.
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Member identity.
    #[serde(default = "default_member")]
    pub member: String,

    /// Path to the `SQLite` database; in-memory store when absent.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Save-ahead window in milliseconds.
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,

    /// Advance cadence in milliseconds.
    #[serde(default = "default_update_step_ms")]
    pub update_step_ms: u64,

    /// Operator reset ceiling in milliseconds.
    #[serde(default = "default_max_reset_gap_ms")]
    pub max_reset_gap_ms: u64,

    /// Port for the Prometheus metrics HTTP endpoint.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            member: default_member(),
            store_path: None,
            save_interval_ms: default_save_interval_ms(),
            update_step_ms: default_update_step_ms(),
            max_reset_gap_ms: default_max_reset_gap_ms(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Derives the oracle configuration.
    #[must_use]
    pub fn oracle_config(&self) -> OracleConfig {
        OracleConfig::builder()
            .root_path(self.root_path.clone())
            .member(self.member.clone())
            .save_interval(Duration::from_millis(self.save_interval_ms))
            .update_step(Duration::from_millis(self.update_step_ms))
            .max_reset_gap(Duration::from_millis(self.max_reset_gap_ms))
            .build()
    }
}
