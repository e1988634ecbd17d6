use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{DailyStats, Settings, VocabList};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Who produced a change. Only `Local` changes are replicated outward;
/// the others are the reconciliation writing its own results back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Merge,
    Reload,
}

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    ListsChanged {
        lists: Arc<Vec<VocabList>>,
        removed: Vec<String>,
        origin: ChangeOrigin,
    },
    SettingsChanged {
        settings: Settings,
        origin: ChangeOrigin,
    },
    StatsRecorded {
        stats: DailyStats,
        origin: ChangeOrigin,
    },
}

impl ChangeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::ListsChanged { .. } => "LISTS_CHANGED",
            ChangeEvent::SettingsChanged { .. } => "SETTINGS_CHANGED",
            ChangeEvent::StatsRecorded { .. } => "STATS_RECORDED",
        }
    }

    pub fn origin(&self) -> ChangeOrigin {
        match self {
            ChangeEvent::ListsChanged { origin, .. }
            | ChangeEvent::SettingsChanged { origin, .. }
            | ChangeEvent::StatsRecorded { origin, .. } => *origin,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEnvelope {
    pub seq: u64,
    pub event: ChangeEvent,
    pub created_at: DateTime<Utc>,
}

pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEnvelope>,
    event_count: AtomicU64,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            event_count: AtomicU64::new(0),
        }
    }

    /// Never blocks; an event with no subscribers is simply dropped.
    pub fn publish(&self, event: ChangeEvent) -> u64 {
        let seq = self.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        let event_type = event.event_type();
        let origin = event.origin();

        let envelope = ChangeEnvelope {
            seq,
            event,
            created_at: Utc::now(),
        };

        let delivered = self.sender.send(envelope).unwrap_or(0);

        debug!(
            event_type = event_type,
            origin = ?origin,
            seq = seq,
            delivered_to = delivered,
            "Change published"
        );

        seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_change_bus_publish_subscribe() {
        let bus = ChangeBus::default();
        let mut receiver = bus.subscribe();

        bus.publish(ChangeEvent::SettingsChanged {
            settings: Settings::default(),
            origin: ChangeOrigin::Local,
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.seq, 1);
        assert_eq!(received.event.event_type(), "SETTINGS_CHANGED");
        assert_eq!(received.event.origin(), ChangeOrigin::Local);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = ChangeBus::new(4);
        let seq = bus.publish(ChangeEvent::ListsChanged {
            lists: Arc::new(Vec::new()),
            removed: Vec::new(),
            origin: ChangeOrigin::Merge,
        });
        assert_eq!(seq, 1);
        assert_eq!(bus.event_count(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_unsubscribes() {
        let bus = ChangeBus::default();
        let receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(receiver);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
