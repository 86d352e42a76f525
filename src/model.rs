//! Core telemetry types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensor channels tracked per equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Vibration,
    Temperature,
    Power,
    Pressure,
    Rpm,
    Torque,
}

impl SensorType {
    /// All tracked sensor types, in canonical order.
    pub const ALL: [SensorType; 6] = [
        SensorType::Vibration,
        SensorType::Temperature,
        SensorType::Power,
        SensorType::Pressure,
        SensorType::Rpm,
        SensorType::Torque,
    ];

    /// Parse a wire-format sensor type name.
    ///
    /// The upstream gateway still emits `spindle_speed` for RPM channels on
    /// older firmware, so that alias is accepted here.
    pub fn parse(s: &str) -> Option<SensorType> {
        match s {
            "vibration" => Some(SensorType::Vibration),
            "temperature" => Some(SensorType::Temperature),
            "power" => Some(SensorType::Power),
            "pressure" => Some(SensorType::Pressure),
            "rpm" | "spindle_speed" => Some(SensorType::Rpm),
            "torque" => Some(SensorType::Torque),
            _ => None,
        }
    }

    /// Canonical unit for this channel.
    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Vibration => "mm/s",
            SensorType::Temperature => "celsius",
            SensorType::Power => "kW",
            SensorType::Pressure => "bar",
            SensorType::Rpm => "rpm",
            SensorType::Torque => "Nm",
        }
    }

    /// Nominal operating baseline, used when an equipment has never reported
    /// a channel at commit time.
    pub fn baseline(&self) -> f64 {
        match self {
            SensorType::Vibration => 2.0,
            SensorType::Temperature => 50.0,
            SensorType::Power => 30.0,
            SensorType::Pressure => 5.0,
            SensorType::Rpm => 8500.0,
            SensorType::Torque => 220.0,
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorType::Vibration => write!(f, "vibration"),
            SensorType::Temperature => write!(f, "temperature"),
            SensorType::Power => write!(f, "power"),
            SensorType::Pressure => write!(f, "pressure"),
            SensorType::Rpm => write!(f, "rpm"),
            SensorType::Torque => write!(f, "torque"),
        }
    }
}

/// Gateway-assigned quality flag on a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityFlag {
    Good,
    Warning,
    Bad,
}

impl QualityFlag {
    /// Gateways sometimes omit or mangle the flag; default to GOOD.
    pub fn parse(s: &str) -> QualityFlag {
        match s {
            "WARNING" => QualityFlag::Warning,
            "BAD" => QualityFlag::Bad,
            _ => QualityFlag::Good,
        }
    }
}

/// One decoded reading from the upstream stream. Immutable once decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub equipment_id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub quality: QualityFlag,
}

/// A merged per-equipment snapshot built at commit time from the latest
/// reading of each channel. Exactly one is committed per equipment per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentSample {
    pub equipment_id: String,
    pub captured_at: DateTime<Utc>,
    pub vibration: f64,
    pub temperature: f64,
    pub power: f64,
    pub pressure: f64,
    pub rpm: f64,
    pub torque: f64,
}

impl EquipmentSample {
    /// Value for a given channel.
    pub fn value(&self, sensor: SensorType) -> f64 {
        match sensor {
            SensorType::Vibration => self.vibration,
            SensorType::Temperature => self.temperature,
            SensorType::Power => self.power,
            SensorType::Pressure => self.pressure,
            SensorType::Rpm => self.rpm,
            SensorType::Torque => self.torque,
        }
    }

    /// Set the value for a given channel.
    pub fn set_value(&mut self, sensor: SensorType, value: f64) {
        match sensor {
            SensorType::Vibration => self.vibration = value,
            SensorType::Temperature => self.temperature = value,
            SensorType::Power => self.power = value,
            SensorType::Pressure => self.pressure = value,
            SensorType::Rpm => self.rpm = value,
            SensorType::Torque => self.torque = value,
        }
    }

    /// A sample with every channel at its nominal baseline.
    pub fn at_baseline(equipment_id: &str, captured_at: DateTime<Utc>) -> Self {
        EquipmentSample {
            equipment_id: equipment_id.to_string(),
            captured_at,
            vibration: SensorType::Vibration.baseline(),
            temperature: SensorType::Temperature.baseline(),
            power: SensorType::Power.baseline(),
            pressure: SensorType::Pressure.baseline(),
            rpm: SensorType::Rpm.baseline(),
            torque: SensorType::Torque.baseline(),
        }
    }
}
