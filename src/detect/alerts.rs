//! Read-side merge of the two risk signals into one ranked alert list.
//!
//! Threshold breaches and the ML failure-probability overlay are refreshed
//! on independent cadences, so they are kept in separate stores and joined
//! here, statelessly, at read time.

use crate::config::RiskConfig;
use crate::detect::thresholds::{recommendation, ThresholdTable};
use crate::detect::{Alert, AlertSource, ThresholdLevel};
use crate::model::{EquipmentSample, SensorType};
use crate::risk::RiskPrediction;

/// Compute the ranked alert list for one equipment from its latest sample
/// and its (possibly absent) risk prediction. Critical alerts sort first.
pub fn merge_alerts(
    sample: &EquipmentSample,
    table: &ThresholdTable,
    risk: Option<&RiskPrediction>,
    risk_cfg: &RiskConfig,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for sensor in SensorType::ALL {
        let value = sample.value(sensor);
        let level = table.classify(sensor, value);
        if level == ThresholdLevel::Normal {
            continue;
        }
        let bounds = table.bounds(sensor);
        let limit = match level {
            ThresholdLevel::Critical => bounds.critical,
            _ => bounds.warning,
        };
        alerts.push(Alert {
            equipment_id: sample.equipment_id.clone(),
            severity: level,
            source: AlertSource::Sensor(sensor),
            message: format!(
                "{} reading of {:.2} {} exceeds {} threshold of {:.2}. {}",
                sensor,
                value,
                sensor.unit(),
                match level {
                    ThresholdLevel::Critical => "critical",
                    _ => "warning",
                },
                limit,
                recommendation(sensor, level),
            ),
            value,
            limit,
            raised_at: sample.captured_at,
        });
    }

    if let Some(pred) = risk {
        let level = if pred.failure_probability >= risk_cfg.critical_cutoff {
            ThresholdLevel::Critical
        } else if pred.failure_probability >= risk_cfg.warning_cutoff {
            ThresholdLevel::Warning
        } else {
            ThresholdLevel::Normal
        };
        if level != ThresholdLevel::Normal {
            let limit = match level {
                ThresholdLevel::Critical => risk_cfg.critical_cutoff,
                _ => risk_cfg.warning_cutoff,
            };
            alerts.push(Alert {
                equipment_id: sample.equipment_id.clone(),
                severity: level,
                source: AlertSource::RiskModel,
                message: format!(
                    "model {} scores failure probability at {:.2} ({}). Probable cause: {}",
                    pred.model_id,
                    pred.failure_probability,
                    match level {
                        ThresholdLevel::Critical => "critical",
                        _ => "elevated",
                    },
                    pred.probable_cause,
                ),
                value: pred.failure_probability,
                limit,
                raised_at: pred.scored_at,
            });
        }
    }

    // Critical first, then warning; stable within a severity.
    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
    alerts
}

/// Overall equipment severity: worst of all sensor levels and the overlay.
pub fn overall_level(
    sample: &EquipmentSample,
    table: &ThresholdTable,
    risk: Option<&RiskPrediction>,
    risk_cfg: &RiskConfig,
) -> ThresholdLevel {
    let mut level = SensorType::ALL
        .iter()
        .map(|&s| table.classify(s, sample.value(s)))
        .fold(ThresholdLevel::Normal, ThresholdLevel::combine);

    if let Some(pred) = risk {
        if pred.failure_probability >= risk_cfg.critical_cutoff {
            level = level.combine(ThresholdLevel::Critical);
        } else if pred.failure_probability >= risk_cfg.warning_cutoff {
            level = level.combine(ThresholdLevel::Warning);
        }
    }
    level
}
