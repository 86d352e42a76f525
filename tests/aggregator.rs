//! End-to-end engine scenarios: scripted upstream, risk, and roster sources
//! drive the full aggregation pipeline under paused time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use plantpulse::config::{Bounds, PulseConfig};
use plantpulse::detect::{AlertSource, ThresholdLevel};
use plantpulse::model::SensorType;
use plantpulse::risk::{RiskLevel, RiskPrediction, RiskSource};
use plantpulse::roster::{RosterEntry, RosterSource};
use plantpulse::service::{Aggregator, ServiceError};
use plantpulse::stream::source::EventSource;
use plantpulse::stream::{ConnectionStatus, StreamError};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

enum Feed {
    Line(String),
    /// Upstream closes the connection.
    Drop,
}

/// Upstream source driven by the test through a channel.
struct ScriptedSource {
    feed: mpsc::UnboundedReceiver<Feed>,
    /// Number of connect attempts that should fail before succeeding again.
    fail_connects: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

struct ScriptHandle {
    feed: mpsc::UnboundedSender<Feed>,
    fail_connects: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

fn scripted_source() -> (ScriptedSource, ScriptHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fail_connects = Arc::new(AtomicUsize::new(0));
    let connects = Arc::new(AtomicUsize::new(0));
    (
        ScriptedSource {
            feed: rx,
            fail_connects: fail_connects.clone(),
            connects: connects.clone(),
        },
        ScriptHandle {
            feed: tx,
            fail_connects,
            connects,
        },
    )
}

impl ScriptHandle {
    fn send_reading(&self, equipment: &str, sensor: &str, value: f64) {
        let line = format!(
            r#"{{"equipmentId":"{equipment}","sensorType":"{sensor}","value":{value}}}"#
        );
        // After stop() the engine side of the channel is gone; sends are
        // deliberately fire-and-forget.
        let _ = self.feed.send(Feed::Line(line));
    }

    fn send_raw(&self, line: &str) {
        let _ = self.feed.send(Feed::Line(line.to_string()));
    }

    fn drop_connection(&self) {
        let _ = self.feed.send(Feed::Drop);
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.fail_connects.load(Ordering::SeqCst) > 0 {
            self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("simulated connect failure");
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<String>, StreamError> {
        match self.feed.recv().await {
            Some(Feed::Line(line)) => Ok(Some(line)),
            Some(Feed::Drop) => Ok(None),
            // Script finished: behave like a quiet upstream.
            None => futures::future::pending().await,
        }
    }
}

/// Scoring service returning a fixed prediction set, stamped fresh per poll.
struct FakeRiskSource {
    predictions: Mutex<Vec<(String, f64)>>,
}

impl FakeRiskSource {
    fn new(predictions: Vec<(&str, f64)>) -> Arc<Self> {
        Arc::new(Self {
            predictions: Mutex::new(
                predictions
                    .into_iter()
                    .map(|(id, p)| (id.to_string(), p))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl RiskSource for FakeRiskSource {
    async fn fetch(&self) -> anyhow::Result<Vec<RiskPrediction>> {
        let predictions = self.predictions.lock().unwrap();
        Ok(predictions
            .iter()
            .map(|(id, probability)| RiskPrediction {
                equipment_id: id.clone(),
                failure_probability: *probability,
                risk_level: RiskLevel::High,
                probable_cause: "bearing degradation".to_string(),
                scored_at: Utc::now(),
                model_id: "failure-risk-v3".to_string(),
            })
            .collect())
    }
}

/// Roster service that replays a scripted sequence of responses, then
/// repeats the last one.
struct FakeRosterSource {
    responses: Mutex<VecDeque<Vec<RosterEntry>>>,
    last: Mutex<Vec<RosterEntry>>,
}

fn roster_entry(id: &str, facility: &str, cycles: u64) -> RosterEntry {
    RosterEntry {
        equipment_id: id.to_string(),
        facility_id: facility.to_string(),
        facility_name: Some(format!("{facility} Plant")),
        name: format!("{id} mill"),
        kind: "CNC-MILL".to_string(),
        status: "operational".to_string(),
        cycle_count: cycles,
    }
}

impl FakeRosterSource {
    fn new(responses: Vec<Vec<RosterEntry>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(Vec::new()),
        })
    }

    fn empty() -> Arc<Self> {
        Self::new(vec![Vec::new()])
    }
}

#[async_trait]
impl RosterSource for FakeRosterSource {
    async fn fetch(&self) -> anyhow::Result<Vec<RosterEntry>> {
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(entries) => {
                *self.last.lock().unwrap() = entries.clone();
                Ok(entries)
            }
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

fn test_config() -> PulseConfig {
    PulseConfig::default()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn end_to_end_three_ticks_classify_and_window() {
    // The scenario pins its own temperature boundary so the expected
    // classification at 62 degrees is explicit in the test.
    let mut config = test_config();
    config.thresholds.temperature = Bounds {
        warning: 60.0,
        critical: 85.0,
    };
    let aggregator = Arc::new(Aggregator::new(config));

    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    // Three commit ticks with linearly rising values.
    script.send_reading("X1", "vibration", 2.5);
    script.send_reading("X1", "temperature", 48.0);
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    script.send_reading("X1", "vibration", 3.35);
    script.send_reading("X1", "temperature", 55.0);
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    script.send_reading("X1", "vibration", 4.2);
    script.send_reading("X1", "temperature", 62.0);
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let snapshot = aggregator.snapshot("X1").await.unwrap();
    assert_eq!(snapshot.window.len(), 3);
    assert_eq!(snapshot.latest.vibration, 4.2);
    assert_eq!(snapshot.latest.temperature, 62.0);

    // Monotonic capture times.
    for pair in snapshot.window.windows(2) {
        assert!(pair[0].captured_at < pair[1].captured_at);
    }

    let status = aggregator.equipment_status("X1").await.unwrap();
    assert_eq!(status.levels["vibration"], ThresholdLevel::Critical);
    assert_eq!(status.levels["temperature"], ThresholdLevel::Warning);
    assert_eq!(status.health, ThresholdLevel::Critical);

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_preserves_history_and_resumes() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    script.send_reading("PHX-CNC-007", "vibration", 2.4);
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(aggregator.snapshot("PHX-CNC-007").await.unwrap().window.len(), 1);

    // Drop the connection and make the next three reconnect attempts fail:
    // backoff cycles of ~1s, ~2s, ~4s before the fourth attempt succeeds.
    script.fail_connects.store(3, Ordering::SeqCst);
    let connects_before = script.connects.load(Ordering::SeqCst);
    script.drop_connection();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(script.connects.load(Ordering::SeqCst), connects_before + 1);
    assert_eq!(aggregator.connection_status(), ConnectionStatus::Connected);

    // History survived the outage; new samples append without duplication.
    assert_eq!(aggregator.snapshot("PHX-CNC-007").await.unwrap().window.len(), 1);

    script.send_reading("PHX-CNC-007", "vibration", 2.6);
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let snapshot = aggregator.snapshot("PHX-CNC-007").await.unwrap();
    assert_eq!(snapshot.window.len(), 2);
    assert_eq!(snapshot.latest.vibration, 2.6);

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn window_eviction_respects_capacity() {
    let mut config = test_config();
    config.window.capacity = 3;
    let aggregator = Arc::new(Aggregator::new(config));
    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    for i in 0..6 {
        script.send_reading("MUC-CNC-001", "power", 30.0 + i as f64);
        tokio::time::sleep(Duration::from_millis(2_100)).await;
    }

    let snapshot = aggregator.snapshot("MUC-CNC-001").await.unwrap();
    assert_eq!(snapshot.window.len(), 3);
    assert_eq!(snapshot.latest.power, 35.0);

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn subscriber_observes_commit_ticks_in_order() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    let mut subscription = aggregator.subscribe("SHA-CNC-002").await;

    script.send_reading("SHA-CNC-002", "torque", 210.0);
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    script.send_reading("SHA-CNC-002", "torque", 215.0);
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let first = subscription.next().await.unwrap();
    let second = subscription.next().await.unwrap();
    assert_eq!(first.torque, 210.0);
    assert_eq!(second.torque, 215.0);
    assert!(first.captured_at < second.captured_at);

    subscription.unsubscribe();
    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_events_are_dropped_without_killing_the_stream() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    script.send_raw("{{{ definitely not json");
    script.send_raw(r#"{"equipmentId":"","sensorType":"vibration","value":1.0}"#);
    script.send_reading("PHX-CNC-001", "vibration", 2.2);
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let snapshot = aggregator.snapshot("PHX-CNC-001").await.unwrap();
    assert_eq!(snapshot.window.len(), 1);

    let stats = aggregator.service_stats().await;
    assert_eq!(stats.stream.events_dropped, 2);
    assert_eq!(stats.stream.events_received, 1);

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn risk_overlay_raises_critical_alert_on_quiet_sensors() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(
            source,
            FakeRiskSource::new(vec![("PHX-CNC-007", 0.75)]),
            FakeRosterSource::empty(),
        )
        .await;

    // All channels at nominal values; only the overlay is unhappy.
    script.send_reading("PHX-CNC-007", "vibration", 2.0);
    script.send_reading("PHX-CNC-007", "temperature", 50.0);
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let alerts = aggregator.alerts_for("PHX-CNC-007").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, ThresholdLevel::Critical);
    assert_eq!(alerts[0].source, AlertSource::RiskModel);

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn threshold_breach_raises_sensor_alert_without_overlay() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    script.send_reading("PHX-CNC-007", "vibration", 4.2);
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let alerts = aggregator.alerts_for("PHX-CNC-007").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, ThresholdLevel::Critical);
    assert_eq!(
        alerts[0].source,
        AlertSource::Sensor(SensorType::Vibration)
    );

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn roster_cycle_reset_clears_window() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(
            source,
            FakeRiskSource::new(vec![]),
            FakeRosterSource::new(vec![
                vec![roster_entry("PHX-CNC-003", "PHX", 900)],
                vec![roster_entry("PHX-CNC-003", "PHX", 4)],
            ]),
        )
        .await;

    script.send_reading("PHX-CNC-003", "pressure", 5.2);
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(aggregator.snapshot("PHX-CNC-003").await.is_ok());

    // Second roster poll (one interval later) reports the counter rewound:
    // the equipment was recommissioned and its history must be cleared.
    tokio::time::sleep(Duration::from_secs(61)).await;
    let err = aggregator.snapshot("PHX-CNC-003").await.unwrap_err();
    assert!(matches!(err, ServiceError::UnknownEquipment { .. }));

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn facility_stats_over_live_equipment() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(
            source,
            FakeRiskSource::new(vec![]),
            FakeRosterSource::new(vec![vec![
                roster_entry("PHX-CNC-001", "PHX", 10),
                roster_entry("PHX-CNC-002", "PHX", 10),
                roster_entry("MUC-CNC-001", "MUC", 10),
            ]]),
        )
        .await;

    script.send_reading("PHX-CNC-001", "vibration", 2.0);
    script.send_reading("PHX-CNC-002", "vibration", 4.0);
    script.send_reading("MUC-CNC-001", "vibration", 2.1);
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let stats = aggregator.facility_stats("PHX").await;
    assert_eq!(stats.equipment_count, 2);
    assert_eq!(stats.critical_count, 1);
    assert_eq!(stats.facility_name.as_deref(), Some("PHX Plant"));
    assert_eq!(stats.alerting_equipment, vec!["PHX-CNC-002".to_string()]);

    let fleet = aggregator.fleet_overview().await;
    assert_eq!(fleet.total_equipment, 3);
    assert_eq!(fleet.facilities.len(), 2);

    aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_halts_ingestion_and_is_idempotent() {
    let aggregator = Arc::new(Aggregator::new(test_config()));
    let (source, script) = scripted_source();
    aggregator
        .start(source, FakeRiskSource::new(vec![]), FakeRosterSource::empty())
        .await;

    script.send_reading("PHX-CNC-001", "rpm", 8600.0);
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(aggregator.snapshot("PHX-CNC-001").await.unwrap().window.len(), 1);

    aggregator.stop().await;
    assert_eq!(aggregator.connection_status(), ConnectionStatus::Stopped);

    // Readings after stop never land.
    script.send_reading("PHX-CNC-001", "rpm", 8700.0);
    tokio::time::sleep(Duration::from_millis(4_100)).await;
    let snapshot = aggregator.snapshot("PHX-CNC-001").await.unwrap();
    assert_eq!(snapshot.window.len(), 1);
    assert_eq!(snapshot.latest.rpm, 8600.0);

    aggregator.stop().await;
}
