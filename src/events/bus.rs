//! # Broadcast bus for observability events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: publishing never blocks, every
//! receiver gets a clone of each event sent after it subscribed, and slow
//! receivers see `RecvError::Lagged(n)` instead of stalling publishers.
//!
//! ```text
//! Publishers:                            Receivers:
//!   event loop ──┐                     ┌──► subscriber listener ──► SubscriberSet
//!   scheduler  ──┼──► Bus (ring buf) ──┤
//!   sub workers ─┘                     └──► SupervisorHandle::events()
//! ```

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for observability events.
///
/// Cheap to clone; events published with no receiver attached are dropped.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_receivers_only_see_later_events() {
        let bus = Bus::new(8);
        bus.publish(Event::new(EventKind::ShutdownRequested));
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::WorkerStarting).with_worker("web"));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::WorkerStarting);
        assert!(rx.try_recv().is_err());
    }
}
