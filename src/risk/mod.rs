//! Externally-computed failure risk overlay.
//!
//! The scoring service periodically publishes a failure probability per
//! equipment. We poll it on a fixed cadence and hold only the latest epoch:
//! each successful poll replaces the whole map in one commit, so readers
//! never observe a mix of scoring epochs. A failed poll means "no update
//! this cycle" and the previous contents stay in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Risk band assigned by the scoring model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One prediction from the scoring service. Replaced wholesale on each
/// refresh; no history is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPrediction {
    pub equipment_id: String,
    pub failure_probability: f64,
    pub risk_level: RiskLevel,
    pub probable_cause: String,
    pub scored_at: DateTime<Utc>,
    pub model_id: String,
}

/// Latest prediction per equipment, with a staleness cutoff.
pub struct RiskOverlayCache {
    predictions: RwLock<HashMap<String, RiskPrediction>>,
    /// Predictions scored longer ago than this are treated as absent, so a
    /// wedged scoring service can neither mask a threshold alert nor keep
    /// raising one.
    max_age: chrono::Duration,
}

impl RiskOverlayCache {
    /// `poll_interval` is the configured refresh cadence; anything older
    /// than twice that is stale.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            predictions: RwLock::new(HashMap::new()),
            max_age: chrono::Duration::from_std(poll_interval * 2)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Atomically replace the whole map with a new scoring epoch.
    pub async fn refresh(&self, predictions: Vec<RiskPrediction>) {
        let map: HashMap<String, RiskPrediction> = predictions
            .into_iter()
            .map(|p| (p.equipment_id.clone(), p))
            .collect();
        *self.predictions.write().await = map;
    }

    /// Latest non-stale prediction for an equipment.
    pub async fn get(&self, equipment_id: &str) -> Option<RiskPrediction> {
        self.get_at(equipment_id, Utc::now()).await
    }

    /// Staleness-checked lookup against an explicit clock.
    pub async fn get_at(
        &self,
        equipment_id: &str,
        now: DateTime<Utc>,
    ) -> Option<RiskPrediction> {
        let guard = self.predictions.read().await;
        let pred = guard.get(equipment_id)?;
        if now - pred.scored_at > self.max_age {
            return None;
        }
        Some(pred.clone())
    }

    pub async fn len(&self) -> usize {
        self.predictions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.predictions.read().await.is_empty()
    }
}

/// Boundary to the external scoring service.
#[async_trait]
pub trait RiskSource: Send + Sync {
    /// Fetch the full current prediction set for all known equipment.
    async fn fetch(&self) -> anyhow::Result<Vec<RiskPrediction>>;
}

/// Production source: polls the scoring service over HTTP.
pub struct HttpRiskSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRiskSource {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl RiskSource for HttpRiskSource {
    async fn fetch(&self) -> anyhow::Result<Vec<RiskPrediction>> {
        let predictions = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RiskPrediction>>()
            .await?;
        Ok(predictions)
    }
}

/// Poll loop: refresh the cache every `interval` until cancelled.
pub async fn run_risk_poll(
    cache: Arc<RiskOverlayCache>,
    source: Arc<dyn RiskSource>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("risk overlay poll stopped");
                return;
            }
            _ = ticker.tick() => {
                match source.fetch().await {
                    Ok(predictions) => {
                        debug!(count = predictions.len(), "risk overlay refreshed");
                        cache.refresh(predictions).await;
                    }
                    Err(e) => {
                        // Keep the previous epoch; stale entries age out on read.
                        warn!(error = %e, "risk overlay poll failed, keeping previous predictions");
                    }
                }
            }
        }
    }
}
