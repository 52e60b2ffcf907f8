use tokio::sync::mpsc;

use watchparty_core::{
    media::{MediaEvent, MediaPlayer},
    models::{Participant, RoomId},
    session::{HostHandle, Session, ViewerHandle},
    Config, Result,
};

use crate::{HubSignalingClient, LocalPeerNetwork, RelayHub};

/// One room on an in-process hub and peer network. Every participant runs
/// the full login → peer-connect → join sequence.
pub struct LocalParty {
    hub: RelayHub,
    network: LocalPeerNetwork,
    config: Config,
    room_id: RoomId,
}

impl LocalParty {
    #[must_use]
    pub fn new(config: Config, room_id: RoomId) -> Self {
        Self {
            hub: RelayHub::new(&config.relay),
            network: LocalPeerNetwork::new(config.sync.call_answer_timeout()),
            config,
            room_id,
        }
    }

    pub async fn host(
        &self,
        display_name: &str,
        player: Box<dyn MediaPlayer>,
        media_events: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Result<HostHandle> {
        let session = self.login(display_name).await?;
        Ok(session.host(self.room_id.clone(), player, media_events))
    }

    pub async fn viewer(
        &self,
        display_name: &str,
        player: Box<dyn MediaPlayer>,
        media_events: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Result<ViewerHandle> {
        let session = self.login(display_name).await?;
        Ok(session.join(self.room_id.clone(), player, media_events))
    }

    async fn login(
        &self,
        display_name: &str,
    ) -> Result<watchparty_core::session::ConnectedSession> {
        let signaling = HubSignalingClient::connect(&self.hub);
        Session::login(display_name, self.config.clone(), signaling)?
            .connect(&self.network.connector())
            .await
    }

    /// The relay's authoritative roster
    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.hub.roster(&self.room_id)
    }

    #[must_use]
    pub const fn hub(&self) -> &RelayHub {
        &self.hub
    }

    #[must_use]
    pub const fn network(&self) -> &LocalPeerNetwork {
        &self.network
    }

    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}
