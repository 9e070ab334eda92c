use super::{BusError, BusMessage, BusSubscription, TickBus};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::{Arc, mpsc};
use std::time::Duration;

/// In-memory fanout bus used for tests and single-process deployments.
///
/// Channels are created lazily on first subscribe; publishing to a channel nobody listens on
/// drops the message, matching the no-replay bus contract.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    channels: Arc<Mutex<FnvHashMap<String, Vec<mpsc::Sender<BusMessage>>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on the given channel. Helper used in tests.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

impl TickBus for InMemoryBus {
    fn publish(&self, channel: &str, message: &BusMessage) -> Result<(), BusError> {
        let mut channels = self.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            // Prune subscriptions whose receiver has been dropped.
            subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        let (tx, rx) = mpsc::channel();
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Box::new(InMemorySubscription { rx }))
    }
}

struct InMemorySubscription {
    rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription for InMemorySubscription {
    fn recv(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            // The bus itself was dropped; to a consumer this is indistinguishable from a
            // producer that never publishes.
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Tick;
    use smol_str::SmolStr;

    fn tick(instrument: &str) -> BusMessage {
        BusMessage::Tick(Tick {
            instrument: SmolStr::new(instrument),
            timestamp: None,
            bid: None,
            ask: None,
            mid: None,
        })
    }

    #[test]
    fn test_messages_published_before_subscribe_are_not_delivered() {
        let bus = InMemoryBus::new();
        bus.publish("ticks", &tick("EUR_USD")).unwrap();

        let mut subscription = bus.subscribe("ticks").unwrap();
        assert_eq!(
            subscription.recv(Duration::from_millis(10)).unwrap(),
            None
        );
    }

    #[test]
    fn test_delivery_preserves_producer_order() {
        let bus = InMemoryBus::new();
        let mut subscription = bus.subscribe("ticks").unwrap();

        bus.publish("ticks", &tick("a")).unwrap();
        bus.publish("ticks", &tick("b")).unwrap();
        bus.publish("ticks", &BusMessage::Eof { count: Some(2) })
            .unwrap();

        assert_eq!(
            subscription.recv(Duration::from_millis(100)).unwrap(),
            Some(tick("a"))
        );
        assert_eq!(
            subscription.recv(Duration::from_millis(100)).unwrap(),
            Some(tick("b"))
        );
        assert_eq!(
            subscription.recv(Duration::from_millis(100)).unwrap(),
            Some(BusMessage::Eof { count: Some(2) })
        );
    }

    #[test]
    fn test_fanout_reaches_every_subscriber() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("ticks").unwrap();
        let mut second = bus.subscribe("ticks").unwrap();

        bus.publish("ticks", &tick("EUR_USD")).unwrap();

        assert!(first.recv(Duration::from_millis(100)).unwrap().is_some());
        assert!(second.recv(Duration::from_millis(100)).unwrap().is_some());
    }

    #[test]
    fn test_dropped_subscriptions_are_pruned() {
        let bus = InMemoryBus::new();
        let subscription = bus.subscribe("ticks").unwrap();
        drop(subscription);

        bus.publish("ticks", &tick("EUR_USD")).unwrap();
        assert_eq!(bus.subscriber_count("ticks"), 0);
    }
}
