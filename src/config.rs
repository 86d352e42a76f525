//! TOML configuration for the PlantPulse daemon.
//!
//! Layered configuration with sensible defaults, environment variable
//! override for the config file path, and standard filesystem locations.
//! Nothing in the engine hardcodes a tunable: commit cadence, window
//! capacity, threshold boundaries, risk cutoffs, and backoff bounds all
//! come from here.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the plantpulse process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PulseConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded plantpulse configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `PLANTPULSE_CONFIG` environment variable.
    /// 2. `/etc/plantpulse/plantpulse.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("PLANTPULSE_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PLANTPULSE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/plantpulse/plantpulse.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Upstream stream
// ---------------------------------------------------------------------------

/// Upstream sensor stream connection and commit cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Address of the sensor gateway (newline-delimited JSON events over TCP).
    pub upstream_address: String,
    /// Interval between commit ticks, in milliseconds.
    pub commit_interval_ms: u64,
    /// First reconnect backoff delay after a disconnect, in milliseconds.
    pub reconnect_initial_ms: u64,
    /// Upper bound on the reconnect backoff delay, in milliseconds.
    pub reconnect_max_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            upstream_address: "127.0.0.1:9600".to_string(),
            commit_interval_ms: 2_000,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Rolling windows
// ---------------------------------------------------------------------------

/// Per-equipment rolling window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Samples retained per equipment before FIFO eviction.
    pub capacity: usize,
    /// Depth of each subscriber's delivery queue.
    pub subscriber_queue_depth: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            subscriber_queue_depth: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Warning/critical boundary pair for one sensor channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bounds {
    pub warning: f64,
    pub critical: f64,
}

/// Static threshold table, one boundary pair per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub vibration: Bounds,
    pub temperature: Bounds,
    pub power: Bounds,
    pub pressure: Bounds,
    pub rpm: Bounds,
    pub torque: Bounds,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            vibration: Bounds { warning: 3.0, critical: 3.5 },
            temperature: Bounds { warning: 70.0, critical: 85.0 },
            power: Bounds { warning: 50.0, critical: 55.0 },
            pressure: Bounds { warning: 8.0, critical: 10.0 },
            rpm: Bounds { warning: 11_000.0, critical: 12_000.0 },
            torque: Bounds { warning: 400.0, critical: 500.0 },
        }
    }
}

// ---------------------------------------------------------------------------
// Risk overlay
// ---------------------------------------------------------------------------

/// ML failure-score overlay polling and alert cutoffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Scoring service endpoint returning the full current prediction set.
    pub endpoint: String,
    /// Poll interval in seconds. Predictions older than twice this are
    /// treated as absent by the alert merge.
    pub poll_interval_secs: u64,
    /// Failure probability at or above which a warning alert is raised.
    pub warning_cutoff: f64,
    /// Failure probability at or above which a critical alert is raised.
    pub critical_cutoff: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8085/api/predictions".to_string(),
            poll_interval_secs: 30,
            warning_cutoff: 0.3,
            critical_cutoff: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Equipment roster
// ---------------------------------------------------------------------------

/// Roster service polling (facility metadata + upstream reset detection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Roster endpoint listing known equipment and facility metadata.
    pub endpoint: String,
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8086/api/equipment".to_string(),
            poll_interval_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// Viewer-facing HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address for the viewer API.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
