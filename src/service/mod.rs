//! The aggregation service: owned lifecycle, viewer-facing operations.
//!
//! One `Aggregator` is constructed by the process entry point and passed by
//! handle to every consumer -- there is no module-level state. It owns the
//! window store, the risk overlay cache, the roster, and the subscriber
//! registry; `start` spawns the writer and poll tasks, `stop` tears them
//! down deterministically.

pub mod subscribers;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PulseConfig;
use crate::detect::alerts::{merge_alerts, overall_level};
use crate::detect::thresholds::ThresholdTable;
use crate::detect::{Alert, ThresholdLevel};
use crate::model::{EquipmentSample, SensorType};
use crate::risk::{run_risk_poll, RiskOverlayCache, RiskSource};
use crate::rollup::{
    compute_facility_stats, compute_fleet_overview, facility_prefix, FacilityStats,
    FleetOverview,
};
use crate::roster::{run_roster_poll, Roster, RosterEntry, RosterSource};
use crate::service::subscribers::{SubscriberRegistry, Subscription};
use crate::stream::demux::{DemuxState, Demultiplexer};
use crate::stream::source::EventSource;
use crate::stream::{ConnectionStatus, StreamStats, StreamStatsSnapshot};
use crate::window::WindowStore;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The equipment has never committed a sample (or was reset and has not
    /// reported since).
    #[error("unknown equipment: {equipment_id}")]
    UnknownEquipment { equipment_id: String },
}

/// Window plus latest sample, as returned to viewers. Copies -- viewers never
/// hold references into engine state.
#[derive(Debug, Clone, Serialize)]
pub struct EquipmentSnapshot {
    pub equipment_id: String,
    pub window: Vec<EquipmentSample>,
    pub latest: EquipmentSample,
}

/// Composite health view for one equipment.
#[derive(Debug, Clone, Serialize)]
pub struct EquipmentStatus {
    pub equipment_id: String,
    pub kind: Option<String>,
    pub facility_id: String,
    pub health: ThresholdLevel,
    /// Per-channel classification of the latest sample.
    pub levels: BTreeMap<String, ThresholdLevel>,
    pub latest: EquipmentSample,
    pub alerts: Vec<Alert>,
    pub summary: String,
}

/// Service-level counters for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub connection: ConnectionStatus,
    pub active_subscribers: usize,
    pub stream: StreamStatsSnapshot,
    pub server_time: DateTime<Utc>,
}

pub struct Aggregator {
    config: PulseConfig,
    table: ThresholdTable,
    store: Arc<RwLock<WindowStore>>,
    risk: Arc<RiskOverlayCache>,
    roster: Arc<Roster>,
    subscribers: Arc<SubscriberRegistry>,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
    status_rx: watch::Receiver<ConnectionStatus>,
    /// Taken by the first `start`; a second call finds it empty.
    status_tx: Mutex<Option<watch::Sender<ConnectionStatus>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Aggregator {
    pub fn new(config: PulseConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Stopped);
        let table = ThresholdTable::from_config(&config.thresholds);
        let risk = Arc::new(RiskOverlayCache::new(Duration::from_secs(
            config.risk.poll_interval_secs,
        )));
        Self {
            table,
            store: Arc::new(RwLock::new(WindowStore::new(config.window.capacity))),
            risk,
            roster: Arc::new(Roster::new()),
            subscribers: Arc::new(SubscriberRegistry::new(
                config.window.subscriber_queue_depth,
            )),
            stats: Arc::new(StreamStats::default()),
            cancel: CancellationToken::new(),
            status_rx,
            status_tx: Mutex::new(Some(status_tx)),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Start the engine: the demux writer task plus the risk and roster
    /// poll tasks. Calling twice is a warned no-op.
    pub async fn start<S>(
        &self,
        source: S,
        risk_source: Arc<dyn RiskSource>,
        roster_source: Arc<dyn RosterSource>,
    ) where
        S: EventSource + 'static,
    {
        let Some(status_tx) = self.status_tx.lock().await.take() else {
            warn!("aggregator already started");
            return;
        };

        let demux = Demultiplexer::new(
            source,
            DemuxState::new(
                self.store.clone(),
                self.subscribers.clone(),
                self.stats.clone(),
            ),
            self.config.stream.clone(),
            status_tx,
        );

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(demux.run(self.cancel.clone())));
        tasks.push(tokio::spawn(run_risk_poll(
            self.risk.clone(),
            risk_source,
            Duration::from_secs(self.config.risk.poll_interval_secs),
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(run_roster_poll(
            self.roster.clone(),
            self.store.clone(),
            roster_source,
            Duration::from_secs(self.config.roster.poll_interval_secs),
            self.cancel.clone(),
        )));
        info!("aggregator started");
    }

    /// Scoped shutdown: cancel every task and wait for the writer to drain.
    /// No samples are accepted after this returns. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine task aborted during shutdown");
            }
        }
        info!("aggregator stopped");
    }

    // -----------------------------------------------------------------------
    // Viewer-facing reads
    // -----------------------------------------------------------------------

    /// Current window and latest sample for an equipment.
    pub async fn snapshot(
        &self,
        equipment_id: &str,
    ) -> Result<EquipmentSnapshot, ServiceError> {
        let store = self.store.read().await;
        let window = store.snapshot(equipment_id);
        let latest = window.last().cloned().ok_or_else(|| {
            ServiceError::UnknownEquipment {
                equipment_id: equipment_id.to_string(),
            }
        })?;
        Ok(EquipmentSnapshot {
            equipment_id: equipment_id.to_string(),
            window,
            latest,
        })
    }

    /// Register for this equipment's commit ticks.
    pub async fn subscribe(&self, equipment_id: &str) -> Subscription {
        self.subscribers.subscribe(equipment_id).await
    }

    /// Ranked alerts: threshold breaches merged with the risk overlay.
    pub async fn alerts_for(&self, equipment_id: &str) -> Result<Vec<Alert>, ServiceError> {
        let latest = {
            let store = self.store.read().await;
            store.latest(equipment_id).cloned()
        }
        .ok_or_else(|| ServiceError::UnknownEquipment {
            equipment_id: equipment_id.to_string(),
        })?;

        let risk = self.risk.get(equipment_id).await;
        Ok(merge_alerts(
            &latest,
            &self.table,
            risk.as_ref(),
            &self.config.risk,
        ))
    }

    /// Composite status: latest sample, per-channel levels, alerts, summary.
    pub async fn equipment_status(
        &self,
        equipment_id: &str,
    ) -> Result<EquipmentStatus, ServiceError> {
        let latest = {
            let store = self.store.read().await;
            store.latest(equipment_id).cloned()
        }
        .ok_or_else(|| ServiceError::UnknownEquipment {
            equipment_id: equipment_id.to_string(),
        })?;

        let risk = self.risk.get(equipment_id).await;
        let alerts = merge_alerts(&latest, &self.table, risk.as_ref(), &self.config.risk);
        let health = overall_level(&latest, &self.table, risk.as_ref(), &self.config.risk);

        let mut levels = BTreeMap::new();
        for sensor in SensorType::ALL {
            levels.insert(
                sensor.to_string(),
                self.table.classify(sensor, latest.value(sensor)),
            );
        }

        let roster_entry = self.roster.get(equipment_id).await;
        let facility_id = roster_entry
            .as_ref()
            .map(|e| e.facility_id.clone())
            .unwrap_or_else(|| facility_prefix(equipment_id).to_string());
        let kind = roster_entry.as_ref().map(|e| e.kind.clone());

        let summary = build_status_summary(&latest, kind.as_deref(), &facility_id, health, &alerts);

        Ok(EquipmentStatus {
            equipment_id: equipment_id.to_string(),
            kind,
            facility_id,
            health,
            levels,
            latest,
            alerts,
            summary,
        })
    }

    /// Roster listing, optionally filtered by facility.
    pub async fn equipment_list(&self, facility_id: Option<&str>) -> Vec<RosterEntry> {
        self.roster.list(facility_id).await
    }

    /// On-demand facility rollup over current latest samples.
    pub async fn facility_stats(&self, facility_id: &str) -> FacilityStats {
        let samples = self.samples_for_facility(facility_id).await;
        let facility_name = self.roster.facility_name(facility_id).await;
        compute_facility_stats(facility_id, facility_name, &samples, &self.table)
    }

    /// Fleet-wide overview across all facilities with committed samples.
    pub async fn fleet_overview(&self) -> FleetOverview {
        let mut groups: BTreeMap<String, Vec<EquipmentSample>> = BTreeMap::new();
        let ids = {
            let store = self.store.read().await;
            store.equipment_ids()
        };
        for id in ids {
            let latest = {
                let store = self.store.read().await;
                store.latest(&id).cloned()
            };
            let Some(latest) = latest else { continue };
            let facility = match self.roster.facility_of(&id).await {
                Some(f) => f,
                None => facility_prefix(&id).to_string(),
            };
            groups.entry(facility).or_default().push(latest);
        }
        compute_fleet_overview(groups.into_iter().collect(), &self.table)
    }

    /// Connectivity of the single upstream connection.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Counters for the status endpoint.
    pub async fn service_stats(&self) -> ServiceStats {
        ServiceStats {
            connection: self.connection_status(),
            active_subscribers: self.subscribers.subscriber_count().await,
            stream: self.stats.snapshot(),
            server_time: Utc::now(),
        }
    }

    async fn samples_for_facility(&self, facility_id: &str) -> Vec<EquipmentSample> {
        let ids = {
            let store = self.store.read().await;
            store.equipment_ids()
        };
        let mut samples = Vec::new();
        for id in ids {
            let facility = match self.roster.facility_of(&id).await {
                Some(f) => f,
                None => facility_prefix(&id).to_string(),
            };
            if facility != facility_id {
                continue;
            }
            let store = self.store.read().await;
            if let Some(latest) = store.latest(&id) {
                samples.push(latest.clone());
            }
        }
        samples.sort_by(|a, b| a.equipment_id.cmp(&b.equipment_id));
        samples
    }
}

fn build_status_summary(
    latest: &EquipmentSample,
    kind: Option<&str>,
    facility_id: &str,
    health: ThresholdLevel,
    alerts: &[Alert],
) -> String {
    let mut summary = String::new();
    match kind {
        Some(kind) => summary.push_str(&format!(
            "{} ({}) at {} facility. ",
            latest.equipment_id, kind, facility_id
        )),
        None => summary.push_str(&format!(
            "{} at {} facility. ",
            latest.equipment_id, facility_id
        )),
    }
    summary.push_str(&format!("Health: {:?}. ", health));
    if alerts.is_empty() {
        summary.push_str("No active alerts. ");
    } else {
        summary.push_str(&format!("{} active alert(s). ", alerts.len()));
    }
    summary.push_str(&format!(
        "vibration: {:.2} mm/s. temperature: {:.2} celsius.",
        latest.vibration, latest.temperature
    ));
    summary
}
