//! Typed publish/subscribe by event kind
//!
//! Signaling adapters push every inbound event through an [`EventDispatcher`];
//! components subscribe to the kinds they handle. Tests inject synthetic
//! events the same way without a real transport.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::events::{EventKind, SignalEvent};

pub type EventReceiver = mpsc::UnboundedReceiver<SignalEvent>;

#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: Arc<Mutex<HashMap<EventKind, Vec<mpsc::UnboundedSender<SignalEvent>>>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One receiver for all of `kinds`, in delivery order.
    pub fn subscribe(&self, kinds: &[EventKind]) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock();
        for kind in kinds {
            subscribers.entry(*kind).or_default().push(tx.clone());
        }
        rx
    }

    /// Deliver to every live subscriber of the event's kind. Returns how many
    /// received it.
    pub fn dispatch(&self, event: SignalEvent) -> usize {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(&kind) else {
            debug!(event_type = event.event_type(), "No subscribers for event");
            return 0;
        };

        senders.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in senders.iter() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .get(&kind)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}
