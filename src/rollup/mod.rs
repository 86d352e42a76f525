//! Read-only aggregation across equipment: facility and fleet statistics.
//!
//! Computed on demand from the latest committed sample of each equipment --
//! nothing here is cached or stored. Facility membership normally comes from
//! the roster; for equipment the roster has not seen yet we fall back to the
//! fleet convention that ids are prefixed with the facility code
//! (`PHX-CNC-007` belongs to `PHX`). The prefix derivation is fragile if id
//! formats ever diverge, which is why the roster wins when it has an answer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::thresholds::ThresholdTable;
use crate::detect::ThresholdLevel;
use crate::model::{EquipmentSample, SensorType};

/// Min/avg/max over one sensor channel across a facility.
#[derive(Debug, Clone, Serialize)]
pub struct SensorStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

/// Health overview for one facility, derived from current snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct FacilityStats {
    pub facility_id: String,
    pub facility_name: Option<String>,
    pub equipment_count: usize,
    /// Per-channel min/avg/max, keyed by sensor name.
    pub sensors: BTreeMap<String, SensorStats>,
    pub warning_count: usize,
    pub critical_count: usize,
    /// Share of equipment with every channel in the normal band.
    pub health_percentage: f64,
    /// Equipment currently at warning or critical, worst first.
    pub alerting_equipment: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// One facility's line in the fleet overview.
#[derive(Debug, Clone, Serialize)]
pub struct FacilitySummary {
    pub facility_id: String,
    pub equipment_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
    pub health_percentage: f64,
}

/// Fleet-wide health overview across all facilities.
#[derive(Debug, Clone, Serialize)]
pub struct FleetOverview {
    pub facilities: Vec<FacilitySummary>,
    pub total_equipment: usize,
    pub generated_at: DateTime<Utc>,
}

/// Facility code derived from the id prefix convention.
pub fn facility_prefix(equipment_id: &str) -> &str {
    equipment_id.split('-').next().unwrap_or(equipment_id)
}

/// Worst threshold level across all channels of one sample.
fn equipment_level(sample: &EquipmentSample, table: &ThresholdTable) -> ThresholdLevel {
    SensorType::ALL
        .iter()
        .map(|&s| table.classify(s, sample.value(s)))
        .fold(ThresholdLevel::Normal, ThresholdLevel::combine)
}

/// Compute facility statistics from the facility's current latest samples.
pub fn compute_facility_stats(
    facility_id: &str,
    facility_name: Option<String>,
    samples: &[EquipmentSample],
    table: &ThresholdTable,
) -> FacilityStats {
    let mut sensors = BTreeMap::new();
    for sensor in SensorType::ALL {
        if samples.is_empty() {
            continue;
        }
        let values: Vec<f64> = samples.iter().map(|s| s.value(sensor)).collect();
        let sum: f64 = values.iter().sum();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        sensors.insert(
            sensor.to_string(),
            SensorStats {
                average: sum / values.len() as f64,
                min,
                max,
            },
        );
    }

    let mut warning_count = 0;
    let mut critical_count = 0;
    let mut alerting: Vec<(ThresholdLevel, String)> = Vec::new();
    for sample in samples {
        match equipment_level(sample, table) {
            ThresholdLevel::Critical => {
                critical_count += 1;
                alerting.push((ThresholdLevel::Critical, sample.equipment_id.clone()));
            }
            ThresholdLevel::Warning => {
                warning_count += 1;
                alerting.push((ThresholdLevel::Warning, sample.equipment_id.clone()));
            }
            ThresholdLevel::Normal => {}
        }
    }
    // Worst first, then by id for a stable listing.
    alerting.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let total = samples.len();
    let healthy = total - warning_count - critical_count;
    let health_percentage = if total > 0 {
        (healthy as f64 * 100.0) / total as f64
    } else {
        0.0
    };

    FacilityStats {
        facility_id: facility_id.to_string(),
        facility_name,
        equipment_count: total,
        sensors,
        warning_count,
        critical_count,
        health_percentage,
        alerting_equipment: alerting.into_iter().map(|(_, id)| id).collect(),
        generated_at: Utc::now(),
    }
}

/// Compute the fleet overview from samples grouped by facility.
pub fn compute_fleet_overview(
    groups: Vec<(String, Vec<EquipmentSample>)>,
    table: &ThresholdTable,
) -> FleetOverview {
    let mut facilities: Vec<FacilitySummary> = groups
        .into_iter()
        .map(|(facility_id, samples)| {
            let stats = compute_facility_stats(&facility_id, None, &samples, table);
            FacilitySummary {
                facility_id,
                equipment_count: stats.equipment_count,
                warning_count: stats.warning_count,
                critical_count: stats.critical_count,
                health_percentage: stats.health_percentage,
            }
        })
        .collect();
    facilities.sort_by(|a, b| a.facility_id.cmp(&b.facility_id));

    let total_equipment = facilities.iter().map(|f| f.equipment_count).sum();
    FleetOverview {
        facilities,
        total_equipment,
        generated_at: Utc::now(),
    }
}
