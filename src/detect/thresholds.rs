//! Static threshold table and the pure classification function.

use crate::config::{Bounds, ThresholdsConfig};
use crate::detect::ThresholdLevel;
use crate::model::SensorType;

/// Warning/critical boundaries per sensor channel, resolved from config.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    vibration: Bounds,
    temperature: Bounds,
    power: Bounds,
    pressure: Bounds,
    rpm: Bounds,
    torque: Bounds,
}

impl ThresholdTable {
    pub fn from_config(cfg: &ThresholdsConfig) -> Self {
        Self {
            vibration: cfg.vibration,
            temperature: cfg.temperature,
            power: cfg.power,
            pressure: cfg.pressure,
            rpm: cfg.rpm,
            torque: cfg.torque,
        }
    }

    pub fn bounds(&self, sensor: SensorType) -> Bounds {
        match sensor {
            SensorType::Vibration => self.vibration,
            SensorType::Temperature => self.temperature,
            SensorType::Power => self.power,
            SensorType::Pressure => self.pressure,
            SensorType::Rpm => self.rpm,
            SensorType::Torque => self.torque,
        }
    }

    /// Classify a sensor value against this table.
    pub fn classify(&self, sensor: SensorType, value: f64) -> ThresholdLevel {
        let bounds = self.bounds(sensor);
        if value >= bounds.critical {
            ThresholdLevel::Critical
        } else if value >= bounds.warning {
            ThresholdLevel::Warning
        } else {
            ThresholdLevel::Normal
        }
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::from_config(&ThresholdsConfig::default())
    }
}

/// Maintenance recommendation accompanying an alert for a breached channel.
pub fn recommendation(sensor: SensorType, level: ThresholdLevel) -> &'static str {
    if level == ThresholdLevel::Critical {
        return "Immediate inspection required. Consider stopping equipment.";
    }
    match sensor {
        SensorType::Vibration => "Schedule bearing inspection and lubrication check.",
        SensorType::Temperature => "Check cooling system and reduce load if possible.",
        SensorType::Rpm => "Verify speed settings and check for mechanical issues.",
        SensorType::Torque => "Check for binding or excessive load.",
        SensorType::Pressure => "Inspect seals and check for blockages.",
        SensorType::Power => "Check drive electrics and supply phases.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let table = ThresholdTable::default();

        assert_eq!(
            table.classify(SensorType::Vibration, 2.0),
            ThresholdLevel::Normal
        );
        assert_eq!(
            table.classify(SensorType::Vibration, 3.0),
            ThresholdLevel::Warning
        );
        assert_eq!(
            table.classify(SensorType::Vibration, 3.5),
            ThresholdLevel::Critical
        );
        assert_eq!(
            table.classify(SensorType::Vibration, 4.2),
            ThresholdLevel::Critical
        );
    }

    #[test]
    fn test_classify_each_channel_uses_its_own_bounds() {
        let table = ThresholdTable::default();

        assert_eq!(
            table.classify(SensorType::Temperature, 72.0),
            ThresholdLevel::Warning
        );
        assert_eq!(
            table.classify(SensorType::Power, 56.0),
            ThresholdLevel::Critical
        );
        assert_eq!(
            table.classify(SensorType::Rpm, 9_000.0),
            ThresholdLevel::Normal
        );
    }

    #[test]
    fn test_critical_recommendation_overrides_channel() {
        assert_eq!(
            recommendation(SensorType::Vibration, ThresholdLevel::Critical),
            "Immediate inspection required. Consider stopping equipment."
        );
        assert!(
            recommendation(SensorType::Vibration, ThresholdLevel::Warning)
                .contains("bearing")
        );
    }
}
