//! Stream demultiplexer: the single writer task.
//!
//! Owns the upstream connection and the commit timer. Readings accumulate
//! per equipment (latest value per channel wins within a tick); on each
//! commit tick the accumulator is folded into one `EquipmentSample` per
//! active equipment, appended to the window store, and fanned out to
//! subscribers. Upstream disconnects trigger exponential-backoff reconnects
//! without touching committed history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::model::{EquipmentSample, SensorReading, SensorType};
use crate::service::subscribers::SubscriberRegistry;
use crate::stream::decoder::decode_event;
use crate::stream::source::{Backoff, EventSource};
use crate::stream::{ConnectionStatus, StreamStats};
use crate::window::WindowStore;

/// Longest prefix of a malformed payload reproduced in the warn log.
const PAYLOAD_LOG_LIMIT: usize = 120;

/// Everything the demux task mutates apart from the connection itself.
/// Split from the source so the run loop can poll the source and commit
/// concurrently.
pub struct DemuxState {
    store: Arc<RwLock<WindowStore>>,
    subscribers: Arc<SubscriberRegistry>,
    stats: Arc<StreamStats>,
    /// Latest reading per channel per equipment since the last commit.
    accumulator: HashMap<String, HashMap<SensorType, SensorReading>>,
}

impl DemuxState {
    pub fn new(
        store: Arc<RwLock<WindowStore>>,
        subscribers: Arc<SubscriberRegistry>,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            store,
            subscribers,
            stats,
            accumulator: HashMap::new(),
        }
    }

    /// Decode and accumulate one raw event. Malformed payloads are dropped
    /// and logged; they must never terminate the stream.
    pub fn ingest(&mut self, line: &str) {
        use std::sync::atomic::Ordering;

        match decode_event(line) {
            Ok(reading) => {
                self.stats.events_received.fetch_add(1, Ordering::Relaxed);
                self.accumulator
                    .entry(reading.equipment_id.clone())
                    .or_default()
                    .insert(reading.sensor_type, reading);
            }
            Err(e) => {
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                let sample: String = line.chars().take(PAYLOAD_LOG_LIMIT).collect();
                warn!(error = %e, payload = %sample, "dropping malformed event");
            }
        }
    }

    /// Fold the accumulator into one committed sample per active equipment.
    ///
    /// Channels with no reading this tick carry the last committed value
    /// forward, or start from the nominal baseline if the equipment has no
    /// history. Equipment with zero readings since the last tick contribute
    /// nothing -- no synthetic idle samples.
    pub async fn commit(&mut self) {
        use std::sync::atomic::Ordering;

        if self.accumulator.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut committed = Vec::with_capacity(self.accumulator.len());

        for (equipment_id, readings) in self.accumulator.drain() {
            let mut store = self.store.write().await;
            let mut sample = match store.latest(&equipment_id) {
                Some(prev) => {
                    let mut s = prev.clone();
                    s.captured_at = now;
                    s
                }
                None => EquipmentSample::at_baseline(&equipment_id, now),
            };
            for (sensor_type, reading) in readings {
                sample.set_value(sensor_type, reading.value);
            }
            if store.append(sample.clone()) {
                committed.push(sample);
            }
        }

        self.stats.ticks_committed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .samples_committed
            .fetch_add(committed.len() as u64, Ordering::Relaxed);

        // Fan out after the store lock is released.
        for sample in &committed {
            self.subscribers.dispatch(sample).await;
        }
    }
}

/// The demultiplexer task: single upstream connection, commit timer,
/// reconnect-with-backoff lifecycle.
pub struct Demultiplexer<S: EventSource> {
    source: S,
    state: DemuxState,
    config: StreamConfig,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl<S: EventSource> Demultiplexer<S> {
    pub fn new(
        source: S,
        state: DemuxState,
        config: StreamConfig,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            source,
            state,
            config,
            status_tx,
        }
    }

    /// Run until cancelled. This task is the only writer to the window store.
    pub async fn run(self, cancel: CancellationToken) {
        let Demultiplexer {
            mut source,
            mut state,
            config,
            status_tx,
        } = self;

        let mut backoff = Backoff::new(
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        );

        'lifecycle: loop {
            // (Re)connect, backing off between attempts.
            loop {
                if cancel.is_cancelled() {
                    break 'lifecycle;
                }
                match source.connect().await {
                    Ok(()) => {
                        backoff.reset();
                        status_tx.send_replace(ConnectionStatus::Connected);
                        info!("upstream connected");
                        break;
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "upstream connect failed, backing off"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break 'lifecycle,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }

            let mut ticker =
                tokio::time::interval(Duration::from_millis(config.commit_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first interval tick fires immediately; skip it so the
            // first commit happens one full interval after connecting.
            ticker.tick().await;

            // Connected: interleave event reads with commit ticks.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'lifecycle,
                    _ = ticker.tick() => {
                        state.commit().await;
                    }
                    event = source.next_event() => match event {
                        Ok(Some(line)) => state.ingest(&line),
                        Ok(None) => {
                            warn!("upstream closed the stream, reconnecting");
                            status_tx.send_replace(ConnectionStatus::Reconnecting);
                            continue 'lifecycle;
                        }
                        Err(e) => {
                            warn!(error = %e, "upstream read failed, reconnecting");
                            status_tx.send_replace(ConnectionStatus::Reconnecting);
                            continue 'lifecycle;
                        }
                    }
                }
            }
        }

        // Flush whatever accumulated before shutdown so the last tick's
        // readings aren't silently lost.
        state.commit().await;
        status_tx.send_replace(ConnectionStatus::Stopped);
        debug!("demultiplexer stopped");
    }
}
