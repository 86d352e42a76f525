//! Decode one raw gateway event into a typed [`SensorReading`].

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{QualityFlag, SensorReading, SensorType};
use crate::stream::StreamError;

/// Gateway wire shape: one JSON object per line, camelCase field names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    equipment_id: String,
    #[serde(default)]
    sensor_type: String,
    value: f64,
    #[serde(default)]
    unit: Option<String>,
    /// Older gateway firmware omits the timestamp entirely.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    quality_flag: Option<String>,
}

/// Parse one raw NDJSON event line.
///
/// Tolerant where the gateway is sloppy (missing timestamp or quality flag),
/// strict where a bad value would poison downstream state (unknown sensor
/// type, non-finite value, empty equipment id).
pub fn decode_event(line: &str) -> Result<SensorReading, StreamError> {
    let raw: RawEvent = serde_json::from_str(line).map_err(|e| StreamError::Malformed {
        reason: format!("invalid json: {e}"),
    })?;

    if raw.equipment_id.is_empty() {
        return Err(StreamError::Malformed {
            reason: "empty equipmentId".to_string(),
        });
    }

    let sensor_type =
        SensorType::parse(&raw.sensor_type).ok_or_else(|| StreamError::Malformed {
            reason: format!("unknown sensorType: {:?}", raw.sensor_type),
        })?;

    if !raw.value.is_finite() {
        return Err(StreamError::Malformed {
            reason: format!("non-finite value for {}", sensor_type),
        });
    }

    Ok(SensorReading {
        equipment_id: raw.equipment_id,
        sensor_type,
        value: raw.value,
        unit: raw.unit.unwrap_or_else(|| sensor_type.unit().to_string()),
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
        quality: raw
            .quality_flag
            .as_deref()
            .map(QualityFlag::parse)
            .unwrap_or(QualityFlag::Good),
    })
}
