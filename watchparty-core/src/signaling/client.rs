use async_trait::async_trait;

use super::dispatch::EventReceiver;
use super::events::{EventKind, SignalEvent};
use crate::Result;

/// Adapter to the external rendezvous/pub-sub relay.
///
/// `emit` is fire-and-forget from the protocol's point of view: callers log
/// and drop errors because every signaling failure is transient.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn emit(&self, event: SignalEvent) -> Result<()>;

    fn subscribe(&self, kinds: &[EventKind]) -> EventReceiver;
}
