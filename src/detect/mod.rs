//! Threshold classification and layered alerting.

pub mod alerts;
pub mod thresholds;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SensorType;

/// Severity of a classified sensor value or a merged alert.
///
/// Derived, never stored: always recomputed from the latest sample.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLevel {
    Normal,
    Warning,
    Critical,
}

impl ThresholdLevel {
    /// Worst-of fold. Total, commutative, idempotent.
    pub fn combine(self, other: ThresholdLevel) -> ThresholdLevel {
        self.max(other)
    }
}

/// Where an alert came from: a breached sensor channel, or the external
/// failure-probability overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "sensor")]
pub enum AlertSource {
    Sensor(SensorType),
    RiskModel,
}

/// A ranked health alert for one equipment. Derived at read time from the
/// latest sample and the risk overlay; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub equipment_id: String,
    pub severity: ThresholdLevel,
    pub source: AlertSource,
    pub message: String,
    /// Observed value: a sensor reading, or a failure probability.
    pub value: f64,
    /// Boundary that was crossed.
    pub limit: f64,
    pub raised_at: DateTime<Utc>,
}
