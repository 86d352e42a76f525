//! Bounded, per-equipment rolling history of committed samples.
//!
//! Pure data structure: the demultiplexer is its only writer, everything
//! else reads via copying snapshots. Synchronization lives in the service
//! layer, not here.

use std::collections::HashMap;
use std::collections::VecDeque;

use tracing::warn;

use crate::model::EquipmentSample;

/// Time-ordered FIFO buffer of samples for one equipment.
#[derive(Debug)]
pub struct RollingWindow {
    samples: VecDeque<EquipmentSample>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when over capacity.
    ///
    /// Samples must strictly increase in `captured_at`; an out-of-order
    /// append is dropped rather than reordering the window.
    fn push(&mut self, sample: EquipmentSample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.captured_at <= last.captured_at {
                warn!(
                    equipment = %sample.equipment_id,
                    at = %sample.captured_at,
                    last = %last.captured_at,
                    "dropping out-of-order sample"
                );
                return false;
            }
        }
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&EquipmentSample> {
        self.samples.back()
    }

    /// Ordered copy of the window contents, oldest first.
    pub fn to_vec(&self) -> Vec<EquipmentSample> {
        self.samples.iter().cloned().collect()
    }
}

/// All per-equipment windows, keyed by equipment id.
///
/// Windows are created lazily on first commit and never destroyed; they are
/// bounded by capacity and cleared only by an explicit [`WindowStore::reset`]
/// when the upstream equipment is known to have been reset to baseline.
#[derive(Debug)]
pub struct WindowStore {
    windows: HashMap<String, RollingWindow>,
    capacity: usize,
}

impl WindowStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: HashMap::new(),
            capacity,
        }
    }

    /// Append a committed sample to the equipment's window.
    pub fn append(&mut self, sample: EquipmentSample) -> bool {
        let capacity = self.capacity;
        self.windows
            .entry(sample.equipment_id.clone())
            .or_insert_with(|| RollingWindow::new(capacity))
            .push(sample)
    }

    /// Copy of the current window for an equipment, oldest first.
    /// Empty if the equipment has never committed a sample.
    pub fn snapshot(&self, equipment_id: &str) -> Vec<EquipmentSample> {
        self.windows
            .get(equipment_id)
            .map(|w| w.to_vec())
            .unwrap_or_default()
    }

    /// Most recent committed sample for an equipment.
    pub fn latest(&self, equipment_id: &str) -> Option<&EquipmentSample> {
        self.windows.get(equipment_id).and_then(|w| w.latest())
    }

    /// Clear an equipment's window. Used when the upstream equipment was
    /// reset to baseline, so viewers don't see a misleading residual history.
    pub fn reset(&mut self, equipment_id: &str) {
        if let Some(window) = self.windows.get_mut(equipment_id) {
            window.samples.clear();
        }
    }

    /// True if the equipment has ever committed a sample since the last reset.
    pub fn contains(&self, equipment_id: &str) -> bool {
        self.windows
            .get(equipment_id)
            .is_some_and(|w| !w.is_empty())
    }

    /// Ids of all equipment with at least one committed sample.
    pub fn equipment_ids(&self) -> Vec<String> {
        self.windows
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn window_len(&self, equipment_id: &str) -> usize {
        self.windows.get(equipment_id).map_or(0, |w| w.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(id: &str, offset_secs: i64) -> EquipmentSample {
        // Fixed base so an offset fully determines ordering; using Utc::now()
        // per call lets the wall clock drift between samples with equal offsets.
        let base = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        EquipmentSample::at_baseline(id, base + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_append_and_latest() {
        let mut store = WindowStore::new(60);
        assert!(store.append(sample("PHX-CNC-001", 0)));
        assert!(store.append(sample("PHX-CNC-001", 2)));

        let latest = store.latest("PHX-CNC-001").unwrap();
        let snap = store.snapshot("PHX-CNC-001");
        assert_eq!(snap.len(), 2);
        assert_eq!(latest.captured_at, snap[1].captured_at);
    }

    #[test]
    fn test_eviction_keeps_capacity() {
        let mut store = WindowStore::new(5);
        for i in 0..20 {
            store.append(sample("MUC-CNC-002", i));
        }
        assert_eq!(store.window_len("MUC-CNC-002"), 5);

        // Oldest evicted first: the survivors are the last five appended.
        let snap = store.snapshot("MUC-CNC-002");
        assert!(snap[0].captured_at < snap[4].captured_at);
    }

    #[test]
    fn test_out_of_order_append_dropped() {
        let mut store = WindowStore::new(10);
        assert!(store.append(sample("SHA-CNC-003", 10)));
        assert!(!store.append(sample("SHA-CNC-003", 5)));
        assert!(!store.append(sample("SHA-CNC-003", 10)));
        assert_eq!(store.window_len("SHA-CNC-003"), 1);
    }

    #[test]
    fn test_samples_strictly_ordered() {
        let mut store = WindowStore::new(30);
        for i in 0..30 {
            store.append(sample("PHX-CNC-004", i));
        }
        let snap = store.snapshot("PHX-CNC-004");
        for pair in snap.windows(2) {
            assert!(pair[0].captured_at < pair[1].captured_at);
        }
    }

    #[test]
    fn test_reset_clears_window() {
        let mut store = WindowStore::new(10);
        store.append(sample("PHX-CNC-005", 0));
        store.append(sample("PHX-CNC-005", 2));
        assert!(store.contains("PHX-CNC-005"));

        store.reset("PHX-CNC-005");
        assert!(store.snapshot("PHX-CNC-005").is_empty());
        assert!(!store.contains("PHX-CNC-005"));
        assert!(store.latest("PHX-CNC-005").is_none());

        // Appending after a reset starts a fresh history.
        store.append(sample("PHX-CNC-005", 4));
        assert_eq!(store.window_len("PHX-CNC-005"), 1);
    }

    #[test]
    fn test_unknown_equipment_is_empty() {
        let store = WindowStore::new(10);
        assert!(store.snapshot("NOPE-000").is_empty());
        assert!(store.latest("NOPE-000").is_none());
        assert_eq!(store.window_len("NOPE-000"), 0);
    }
}
