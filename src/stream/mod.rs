//! Upstream stream ingestion: decoding, connection ownership, demultiplexing.

pub mod decoder;
pub mod demux;
pub mod source;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// A single corrupt event. Dropped and logged, never fatal.
    #[error("malformed event: {reason}")]
    Malformed { reason: String },

    /// The upstream connection dropped; the demultiplexer reconnects with
    /// backoff and committed history is preserved.
    #[error("upstream disconnected: {0}")]
    Disconnected(String),
}

/// Connectivity of the single upstream connection, pollable by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Stopped,
}

/// Ingestion counters, shared between the demux task and the stats endpoint.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub events_received: AtomicU64,
    pub events_dropped: AtomicU64,
    pub ticks_committed: AtomicU64,
    pub samples_committed: AtomicU64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            ticks_committed: self.ticks_committed.load(Ordering::Relaxed),
            samples_committed: self.samples_committed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the ingestion counters.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatsSnapshot {
    pub events_received: u64,
    pub events_dropped: u64,
    pub ticks_committed: u64,
    pub samples_committed: u64,
}
