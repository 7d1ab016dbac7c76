use crate::market::types::{SyncMessage, Timeframe};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

const SYNC_CHANNEL_CAPACITY: usize = 16;

/// Last-write-wins storage read by poll-based subscribers.
pub trait TimeframeSlot: Send + Sync {
    fn load(&self) -> Option<SyncMessage>;
    fn store(&self, message: SyncMessage);
}

#[derive(Debug, Default)]
pub struct SharedTimeframeSlot {
    value: RwLock<Option<SyncMessage>>,
}

impl TimeframeSlot for SharedTimeframeSlot {
    fn load(&self) -> Option<SyncMessage> {
        *self.value.read()
    }

    fn store(&self, message: SyncMessage) {
        *self.value.write() = Some(message);
    }
}

/// Broadcasts timeframe selections to sessions that share no owner.
#[derive(Clone)]
pub struct TimeframeSync {
    sender: broadcast::Sender<SyncMessage>,
    slot: Arc<dyn TimeframeSlot>,
}

impl fmt::Debug for TimeframeSync {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TimeframeSync")
            .field("subscribers", &self.sender.receiver_count())
            .field("last", &self.slot.load())
            .finish()
    }
}

impl Default for TimeframeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeframeSync {
    pub fn new() -> Self {
        Self::with_slot(Arc::new(SharedTimeframeSlot::default()))
    }

    pub fn with_slot(slot: Arc<dyn TimeframeSlot>) -> Self {
        let (sender, _) = broadcast::channel(SYNC_CHANNEL_CAPACITY);
        Self { sender, slot }
    }

    /// Fire-and-forget: never blocks and tolerates zero subscribers.
    pub fn publish(&self, timeframe: Timeframe) {
        let message = SyncMessage { timeframe };
        self.slot.store(message);
        if self.sender.send(message).is_err() {
            tracing::debug!(timeframe = timeframe.as_str(), "timeframe published with no subscribers");
        }
    }

    pub fn last_published(&self) -> Option<Timeframe> {
        self.slot.load().map(|message| message.timeframe)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self) -> SyncSubscription {
        SyncSubscription {
            receiver: self.sender.subscribe(),
            slot: Arc::clone(&self.slot),
            broadcast_open: true,
        }
    }
}

pub struct SyncSubscription {
    receiver: broadcast::Receiver<SyncMessage>,
    slot: Arc<dyn TimeframeSlot>,
    broadcast_open: bool,
}

impl SyncSubscription {
    /// Waits for the next broadcast. Once every publisher is gone this never
    /// resolves, leaving the poll path as the only source.
    pub async fn recv(&mut self) -> SyncMessage {
        while self.broadcast_open {
            match self.receiver.recv().await {
                Ok(message) => return message,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sync subscriber lagged behind broadcast");
                }
                Err(RecvError::Closed) => {
                    self.broadcast_open = false;
                }
            }
        }
        std::future::pending().await
    }

    /// Drains pending broadcasts without waiting and keeps only the newest.
    pub fn try_recv(&mut self) -> Option<SyncMessage> {
        let mut latest = None;
        while self.broadcast_open {
            match self.receiver.try_recv() {
                Ok(message) => latest = Some(message),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => self.broadcast_open = false,
            }
        }
        latest
    }

    pub fn poll_slot(&self) -> Option<SyncMessage> {
        self.slot.load()
    }

    /// Newest known value: drains queued broadcasts and, when `read_slot` is set,
    /// prefers the slot since every publish writes it before sending.
    pub fn latest(&mut self, read_slot: bool) -> Option<SyncMessage> {
        let drained = self.try_recv();
        if read_slot {
            self.poll_slot().or(drained)
        } else {
            drained
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSlot {
        inner: SharedTimeframeSlot,
        writes: parking_lot::Mutex<usize>,
    }

    impl TimeframeSlot for CountingSlot {
        fn load(&self) -> Option<SyncMessage> {
            self.inner.load()
        }

        fn store(&self, message: SyncMessage) {
            *self.writes.lock() += 1;
            self.inner.store(message);
        }
    }

    #[test]
    fn publish_without_subscribers_still_fills_slot() {
        let sync = TimeframeSync::new();

        sync.publish(Timeframe::M5);

        assert_eq!(sync.subscriber_count(), 0);
        assert_eq!(sync.last_published(), Some(Timeframe::M5));
    }

    #[test]
    fn try_recv_keeps_last_write() {
        let sync = TimeframeSync::new();
        let mut subscription = sync.subscribe();

        sync.publish(Timeframe::M5);
        sync.publish(Timeframe::H1);

        assert_eq!(
            subscription.try_recv(),
            Some(SyncMessage {
                timeframe: Timeframe::H1
            })
        );
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn poll_reads_the_shared_slot() {
        let sync = TimeframeSync::new();
        let subscription = sync.subscribe();
        assert_eq!(subscription.poll_slot(), None);

        sync.publish(Timeframe::D1);

        assert_eq!(
            subscription.poll_slot().map(|message| message.timeframe),
            Some(Timeframe::D1)
        );
    }

    #[test]
    fn injected_slot_receives_every_publish() {
        let slot = Arc::new(CountingSlot::default());
        let sync = TimeframeSync::with_slot(slot.clone());

        sync.publish(Timeframe::M3);
        sync.publish(Timeframe::M15);

        assert_eq!(*slot.writes.lock(), 2);
        assert_eq!(sync.last_published(), Some(Timeframe::M15));
    }

    #[test]
    fn latest_skips_queued_stale_broadcasts() {
        let sync = TimeframeSync::new();
        let mut subscription = sync.subscribe();

        sync.publish(Timeframe::M5);
        sync.publish(Timeframe::H1);

        assert_eq!(
            subscription.latest(true).map(|message| message.timeframe),
            Some(Timeframe::H1)
        );
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn latest_without_slot_uses_only_broadcasts() {
        let slot = Arc::new(SharedTimeframeSlot::default());
        let sync = TimeframeSync::with_slot(slot.clone());
        let mut subscription = sync.subscribe();

        slot.store(SyncMessage {
            timeframe: Timeframe::D1,
        });
        assert_eq!(subscription.latest(false), None);

        sync.publish(Timeframe::M3);
        sync.publish(Timeframe::M15);
        assert_eq!(
            subscription.latest(false).map(|message| message.timeframe),
            Some(Timeframe::M15)
        );
    }

    #[tokio::test]
    async fn recv_delivers_broadcast() {
        let sync = TimeframeSync::new();
        let mut subscription = sync.subscribe();

        sync.publish(Timeframe::W1);

        assert_eq!(subscription.recv().await.timeframe, Timeframe::W1);
    }

    #[tokio::test(start_paused = true)]
    async fn recv_pends_once_publishers_are_gone() {
        let sync = TimeframeSync::new();
        let mut subscription = sync.subscribe();
        sync.publish(Timeframe::M5);
        drop(sync);

        assert_eq!(subscription.recv().await.timeframe, Timeframe::M5);
        let next = tokio::time::timeout(Duration::from_secs(5), subscription.recv()).await;
        assert!(next.is_err());
        assert_eq!(
            subscription.poll_slot().map(|message| message.timeframe),
            Some(Timeframe::M5)
        );
    }
}
