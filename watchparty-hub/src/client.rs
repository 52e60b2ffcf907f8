use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use watchparty_core::signaling::{
    EventDispatcher, EventKind, EventReceiver, SignalEvent, SignalingClient,
};

use crate::hub::{ConnectionId, RelayHub};

/// A participant's connection to a [`RelayHub`].
///
/// Inbound events are pumped into an [`EventDispatcher`] in arrival order.
/// Dropping the client closes the connection.
pub struct HubSignalingClient {
    hub: RelayHub,
    connection_id: ConnectionId,
    dispatcher: EventDispatcher,
    pump: JoinHandle<()>,
}

impl HubSignalingClient {
    #[must_use]
    pub fn connect(hub: &RelayHub) -> Arc<Self> {
        let (connection_id, mut inbound) = hub.connect();
        let dispatcher = EventDispatcher::new();

        let pump = {
            let dispatcher = dispatcher.clone();
            let connection_id = connection_id.clone();
            tokio::spawn(async move {
                while let Some(event) = inbound.recv().await {
                    dispatcher.dispatch(event);
                }
                debug!(connection_id = %connection_id, "Inbound pump finished");
            })
        };

        Arc::new(Self {
            hub: hub.clone(),
            connection_id,
            dispatcher,
            pump,
        })
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

#[async_trait]
impl SignalingClient for HubSignalingClient {
    async fn emit(&self, event: SignalEvent) -> watchparty_core::Result<()> {
        self.hub.publish(&self.connection_id, event)?;
        Ok(())
    }

    fn subscribe(&self, kinds: &[EventKind]) -> EventReceiver {
        self.dispatcher.subscribe(kinds)
    }
}

impl Drop for HubSignalingClient {
    fn drop(&mut self) {
        self.hub.disconnect(&self.connection_id);
        self.pump.abort();
    }
}
