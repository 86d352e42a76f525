//! Per-equipment observer registry.
//!
//! Maps equipment id to a broadcast channel; every subscriber gets its own
//! bounded queue off that channel. The committer only ever `send`s -- a slow
//! subscriber lags and skips its oldest pending updates, it never blocks the
//! commit tick or its neighbors.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::model::EquipmentSample;

pub struct SubscriberRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<EquipmentSample>>>,
    queue_depth: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register a subscriber for one equipment's commit ticks.
    ///
    /// A subscriber registered before a tick's commit begins observes that
    /// tick; registration racing a commit may first observe the next one.
    pub async fn subscribe(&self, equipment_id: &str) -> Subscription {
        let mut channels = self.channels.lock().await;
        let sender = channels
            .entry(equipment_id.to_string())
            .or_insert_with(|| broadcast::channel(self.queue_depth).0);
        Subscription {
            id: Uuid::new_v4(),
            equipment_id: equipment_id.to_string(),
            rx: sender.subscribe(),
        }
    }

    /// Fan a committed sample out to the equipment's subscribers.
    pub async fn dispatch(&self, sample: &EquipmentSample) {
        let mut channels = self.channels.lock().await;
        let dead = match channels.get(&sample.equipment_id) {
            Some(sender) => sender.send(sample.clone()).is_err(),
            None => false,
        };
        if dead {
            // Last receiver is gone; drop the channel until someone
            // subscribes again.
            channels.remove(&sample.equipment_id);
        }
    }

    /// Number of live subscriptions across all equipment.
    pub async fn subscriber_count(&self) -> usize {
        self.channels
            .lock()
            .await
            .values()
            .map(|s| s.receiver_count())
            .sum()
    }
}

/// Handle held by one subscriber. Dropping it unsubscribes; so does
/// [`Subscription::unsubscribe`], and doing both is fine.
pub struct Subscription {
    id: Uuid,
    equipment_id: String,
    rx: broadcast::Receiver<EquipmentSample>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn equipment_id(&self) -> &str {
        &self.equipment_id
    }

    /// Next committed sample, in commit order, never duplicated.
    ///
    /// Returns `None` once the service has stopped. If this subscriber fell
    /// behind, its oldest pending updates are skipped and delivery resumes
    /// with the most recent ones.
    pub async fn next(&mut self) -> Option<EquipmentSample> {
        loop {
            match self.rx.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        subscriber = %self.id,
                        equipment = %self.equipment_id,
                        skipped,
                        "slow subscriber skipped updates"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Deregister. Prompt: no further samples are delivered after return.
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample(id: &str, offset_secs: i64) -> EquipmentSample {
        EquipmentSample::at_baseline(id, Utc::now() + Duration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let registry = SubscriberRegistry::new(16);
        let mut a = registry.subscribe("PHX-CNC-001").await;
        let mut b = registry.subscribe("PHX-CNC-001").await;

        registry.dispatch(&sample("PHX-CNC-001", 0)).await;

        assert!(a.next().await.is_some());
        assert!(b.next().await.is_some());
        assert_eq!(registry.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn test_subscribers_isolated_per_equipment() {
        let registry = SubscriberRegistry::new(16);
        let mut a = registry.subscribe("PHX-CNC-001").await;

        registry.dispatch(&sample("MUC-CNC-002", 0)).await;
        registry.dispatch(&sample("PHX-CNC-001", 1)).await;

        let got = a.next().await.unwrap();
        assert_eq!(got.equipment_id, "PHX-CNC-001");
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_oldest_not_blocks() {
        let registry = SubscriberRegistry::new(4);
        let mut slow = registry.subscribe("PHX-CNC-001").await;

        // Overflow the bounded queue; dispatch must not block or fail.
        for i in 0..10 {
            registry.dispatch(&sample("PHX-CNC-001", i)).await;
        }

        // The slow reader resumes with the most recent updates, in order.
        let first = slow.next().await.unwrap();
        let second = slow.next().await.unwrap();
        assert!(first.captured_at < second.captured_at);
    }

    #[tokio::test]
    async fn test_unsubscribe_prunes_channel() {
        let registry = SubscriberRegistry::new(16);
        let sub = registry.subscribe("PHX-CNC-001").await;
        assert_eq!(registry.subscriber_count().await, 1);

        sub.unsubscribe();
        assert_eq!(registry.subscriber_count().await, 0);

        // Dispatch to an equipment with no live subscribers is a no-op.
        registry.dispatch(&sample("PHX-CNC-001", 0)).await;
    }
}
