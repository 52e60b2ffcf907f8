//! Session lifecycle
//!
//! A session goes through login (display name fixed for its lifetime), then
//! peer-transport initialisation (yielding the transport-assigned id), and
//! only then joins a room as host or viewer. Each role runs as an actor that
//! owns its state machine and is driven by signaling events, local UI
//! commands and media element events.

pub mod host;
pub mod viewer;

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::Config,
    models::{ParticipantId, RoomId},
    service::{PeerConnector, PeerSession, PeerTransport},
    signaling::{SignalEvent, SignalingClient},
    Error, Result,
};

pub use host::{HostHandle, HostSnapshot};
pub use viewer::{ViewerHandle, ViewerSnapshot};

const MAX_DISPLAY_NAME_LENGTH: usize = 32;

/// Display name chosen at login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    display_name: String,
}

impl Identity {
    pub fn login(display_name: &str) -> Result<Self> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(Error::InvalidInput("Display name cannot be empty".to_string()));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
            )));
        }
        Ok(Self {
            display_name: display_name.to_string(),
        })
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// A logged-in session that has not initialised its peer transport yet.
pub struct Session {
    identity: Identity,
    config: Config,
    signaling: Arc<dyn SignalingClient>,
}

impl Session {
    pub fn login(
        display_name: &str,
        config: Config,
        signaling: Arc<dyn SignalingClient>,
    ) -> Result<Self> {
        let identity = Identity::login(display_name)?;
        info!(display_name = identity.display_name(), "Logged in");
        Ok(Self {
            identity,
            config,
            signaling,
        })
    }

    /// Initialise the peer transport. Rooms can only be joined afterwards.
    pub async fn connect(self, connector: &dyn PeerConnector) -> Result<ConnectedSession> {
        let peer = connector.connect().await?;
        info!(
            display_name = self.identity.display_name(),
            peer_id = %peer.transport.local_id(),
            "Peer transport ready"
        );
        Ok(ConnectedSession {
            identity: self.identity,
            config: self.config,
            signaling: self.signaling,
            peer,
        })
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// A session with a ready peer transport, about to take a role in a room.
pub struct ConnectedSession {
    identity: Identity,
    config: Config,
    signaling: Arc<dyn SignalingClient>,
    peer: PeerSession,
}

impl ConnectedSession {
    #[must_use]
    pub fn local_id(&self) -> &ParticipantId {
        self.peer.transport.local_id()
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    fn into_parts(self, room_id: RoomId) -> (SessionContext, PeerSession) {
        let ctx = SessionContext {
            local_id: self.peer.transport.local_id().clone(),
            transport: self.peer.transport.clone(),
            room_id,
            identity: self.identity,
            config: self.config,
            signaling: self.signaling,
        };
        (ctx, self.peer)
    }
}

/// Everything a running role needs, passed explicitly to its actor and torn
/// down with it.
pub struct SessionContext {
    pub config: Config,
    pub room_id: RoomId,
    pub identity: Identity,
    pub local_id: ParticipantId,
    pub signaling: Arc<dyn SignalingClient>,
    pub transport: Arc<dyn PeerTransport>,
}

impl SessionContext {
    /// Signaling failures are transient: log and carry on.
    pub async fn emit(&self, event: SignalEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.signaling.emit(event).await {
            warn!(
                room_id = %self.room_id,
                event_type,
                error = %e,
                "Failed to emit signaling event"
            );
        }
    }

    pub async fn emit_all(&self, events: Vec<SignalEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }

    fn join_room_event(&self) -> SignalEvent {
        SignalEvent::JoinRoom {
            room_id: self.room_id.clone(),
            transport_id: self.local_id.clone(),
            display_name: self.identity.display_name().to_string(),
        }
    }
}

fn session_closed() -> Error {
    Error::InvalidState("Session has ended".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingSignaling, ScriptedConnector};

    #[test]
    fn test_login_validates_display_name() {
        assert_eq!(Identity::login("  alice ").unwrap().display_name(), "alice");
        assert!(matches!(Identity::login("   "), Err(Error::InvalidInput(_))));
        assert!(Identity::login(&"x".repeat(33)).is_err());
    }

    #[tokio::test]
    async fn test_connect_yields_transport_id() {
        let (connector, _transport, _calls) = ScriptedConnector::new("peer-1");
        let session =
            Session::login("alice", Config::default(), RecordingSignaling::new()).unwrap();

        let connected = session.connect(&connector).await.unwrap();
        assert_eq!(connected.local_id().as_str(), "peer-1");
        assert_eq!(connected.identity().display_name(), "alice");

        // The transport initialises once
        let again = Session::login("alice", Config::default(), RecordingSignaling::new()).unwrap();
        assert!(again.connect(&connector).await.is_err());
    }
}
