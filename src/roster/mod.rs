//! Equipment roster: known equipment, facility metadata, reset detection.
//!
//! The roster service is polled on a fixed cadence. Besides seeding the
//! facility rollup with authoritative membership, the roster's monotone
//! cycle counter is how upstream resets are detected: a counter that went
//! backwards means the equipment was recommissioned at baseline, so its
//! rolling window is cleared to avoid a misleading residual history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::window::WindowStore;

/// One roster record from the roster service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub equipment_id: String,
    pub facility_id: String,
    #[serde(default)]
    pub facility_name: Option<String>,
    pub name: String,
    /// Equipment kind, e.g. CNC-MILL, CNC-LATHE, HYD-PRESS.
    pub kind: String,
    /// Operational status as the roster reports it.
    pub status: String,
    /// Monotone run counter. Goes backwards only when the equipment was
    /// reset upstream.
    pub cycle_count: u64,
}

/// Latest roster contents plus the per-equipment cycle watermarks used for
/// reset detection.
pub struct Roster {
    entries: RwLock<HashMap<String, RosterEntry>>,
    watermarks: RwLock<HashMap<String, u64>>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            watermarks: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the roster with a fresh poll result.
    ///
    /// Returns the ids whose cycle counter jumped backwards since the last
    /// poll -- the caller resets those windows.
    pub async fn refresh(&self, entries: Vec<RosterEntry>) -> Vec<String> {
        let mut resets = Vec::new();
        {
            let mut watermarks = self.watermarks.write().await;
            for entry in &entries {
                if let Some(&seen) = watermarks.get(&entry.equipment_id) {
                    if entry.cycle_count < seen {
                        resets.push(entry.equipment_id.clone());
                    }
                }
                watermarks.insert(entry.equipment_id.clone(), entry.cycle_count);
            }
        }

        let map: HashMap<String, RosterEntry> = entries
            .into_iter()
            .map(|e| (e.equipment_id.clone(), e))
            .collect();
        *self.entries.write().await = map;

        resets
    }

    pub async fn get(&self, equipment_id: &str) -> Option<RosterEntry> {
        self.entries.read().await.get(equipment_id).cloned()
    }

    /// Roster-asserted facility for an equipment, when the roster knows it.
    pub async fn facility_of(&self, equipment_id: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(equipment_id)
            .map(|e| e.facility_id.clone())
    }

    pub async fn facility_name(&self, facility_id: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .values()
            .find(|e| e.facility_id == facility_id)
            .and_then(|e| e.facility_name.clone())
    }

    /// All roster entries, optionally filtered by facility.
    pub async fn list(&self, facility_id: Option<&str>) -> Vec<RosterEntry> {
        let entries = self.entries.read().await;
        let mut out: Vec<RosterEntry> = entries
            .values()
            .filter(|e| facility_id.map_or(true, |f| e.facility_id == f))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.equipment_id.cmp(&b.equipment_id));
        out
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

/// Boundary to the roster service.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<RosterEntry>>;
}

/// Production source: polls the roster service over HTTP.
pub struct HttpRosterSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRosterSource {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl RosterSource for HttpRosterSource {
    async fn fetch(&self) -> anyhow::Result<Vec<RosterEntry>> {
        let entries = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RosterEntry>>()
            .await?;
        Ok(entries)
    }
}

/// Poll loop: refresh the roster every `interval` until cancelled, resetting
/// windows for equipment the roster reports as recommissioned.
pub async fn run_roster_poll(
    roster: Arc<Roster>,
    store: Arc<RwLock<WindowStore>>,
    source: Arc<dyn RosterSource>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("roster poll stopped");
                return;
            }
            _ = ticker.tick() => {
                match source.fetch().await {
                    Ok(entries) => {
                        let count = entries.len();
                        let resets = roster.refresh(entries).await;
                        debug!(count, "roster refreshed");
                        for equipment_id in resets {
                            info!(equipment = %equipment_id, "upstream reset detected, clearing window");
                            store.write().await.reset(&equipment_id);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "roster poll failed, keeping previous roster");
                    }
                }
            }
        }
    }
}
