//! Test helpers and fixtures for watchparty-core tests
//!
//! Scripted stand-ins for the relay and the peer network so session actors
//! can be driven by injected events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    media::MediaStream,
    models::{LinkId, Participant, ParticipantId, RoomId},
    service::{IncomingCall, MediaLink, PeerConnector, PeerSession, PeerTransport},
    signaling::{EventDispatcher, EventKind, EventReceiver, SignalEvent, SignalingClient},
    Error, Result,
};

pub fn test_room_id(id: &str) -> RoomId {
    RoomId::from_string(id.to_string())
}

pub fn test_participant(id: &str, name: &str) -> Participant {
    Participant::new(ParticipantId::from(id), name.to_string())
}

/// Records every emitted event; inbound events are injected by the test.
#[derive(Default)]
pub struct RecordingSignaling {
    dispatcher: EventDispatcher,
    emitted: Mutex<Vec<SignalEvent>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an event as if it came from the relay.
    pub fn inject(&self, event: SignalEvent) -> usize {
        self.dispatcher.dispatch(event)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.emitted.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Poll until at least `count` events of `kind` were emitted. Returns
    /// `false` on timeout.
    pub async fn wait_for_count(&self, kind: EventKind, count: usize) -> bool {
        tokio::time::timeout(Duration::from_secs(30), async {
            while self.count(kind) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn last_of(&self, kind: EventKind) -> Option<SignalEvent> {
        self.emitted.lock().iter().rev().find(|e| e.kind() == kind).cloned()
    }
}

#[async_trait]
impl SignalingClient for RecordingSignaling {
    async fn emit(&self, event: SignalEvent) -> Result<()> {
        self.emitted.lock().push(event);
        Ok(())
    }

    fn subscribe(&self, kinds: &[EventKind]) -> EventReceiver {
        self.dispatcher.subscribe(kinds)
    }
}

/// Peer endpoint whose calls succeed immediately unless told otherwise.
pub struct ScriptedPeerTransport {
    id: ParticipantId,
    calls: Mutex<HashMap<ParticipantId, usize>>,
    failing: Mutex<HashSet<ParticipantId>>,
    hung_up: Mutex<Vec<LinkId>>,
    destroyed: AtomicBool,
}

impl ScriptedPeerTransport {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ParticipantId::from(id),
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            hung_up: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn call_count(&self, target: &ParticipantId) -> usize {
        self.calls.lock().get(target).copied().unwrap_or(0)
    }

    pub fn fail_calls_to(&self, target: &ParticipantId) {
        self.failing.lock().insert(target.clone());
    }

    pub fn hung_up(&self) -> Vec<LinkId> {
        self.hung_up.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PeerTransport for ScriptedPeerTransport {
    fn local_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn call(&self, target: &ParticipantId, stream: MediaStream) -> Result<MediaLink> {
        *self.calls.lock().entry(target.clone()).or_default() += 1;
        if self.failing.lock().contains(target) {
            return Err(Error::Link(format!("{target} did not answer")));
        }
        Ok(MediaLink {
            id: LinkId::new(),
            viewer: target.clone(),
            stream,
        })
    }

    fn hang_up(&self, link_id: &LinkId) {
        self.hung_up.lock().push(link_id.clone());
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Hands out a [`ScriptedPeerTransport`] once; calls to it are pushed by the
/// test through the returned sender.
pub struct ScriptedConnector {
    transport: Arc<ScriptedPeerTransport>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<IncomingCall>>>,
}

impl ScriptedConnector {
    pub fn new(
        id: &str,
    ) -> (
        Self,
        Arc<ScriptedPeerTransport>,
        mpsc::UnboundedSender<IncomingCall>,
    ) {
        let transport = ScriptedPeerTransport::new(id);
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            transport: transport.clone(),
            incoming: Mutex::new(Some(rx)),
        };
        (connector, transport, tx)
    }
}

#[async_trait]
impl PeerConnector for ScriptedConnector {
    async fn connect(&self) -> Result<PeerSession> {
        let incoming = self
            .incoming
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("Peer transport already initialised".to_string()))?;
        Ok(PeerSession {
            transport: self.transport.clone(),
            incoming,
        })
    }
}
