//! In-memory peer network
//!
//! Each connected endpoint gets a transport-assigned id. A call delivers an
//! [`IncomingCall`] to the target endpoint and waits for the answer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use watchparty_core::{
    media::MediaStream,
    models::{LinkId, ParticipantId},
    service::{CallAnswer, IncomingCall, MediaLink, PeerConnector, PeerSession, PeerTransport},
    Error, Result,
};

#[derive(Clone)]
pub struct LocalPeerNetwork {
    endpoints: Arc<DashMap<ParticipantId, mpsc::UnboundedSender<IncomingCall>>>,
    /// Established links: `link_id` -> (caller, callee)
    links: Arc<DashMap<LinkId, (ParticipantId, ParticipantId)>>,
    /// Endpoints that currently cannot be reached
    partitioned: Arc<Mutex<HashSet<ParticipantId>>>,
    answer_timeout: Duration,
}

impl LocalPeerNetwork {
    #[must_use]
    pub fn new(answer_timeout: Duration) -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
            links: Arc::new(DashMap::new()),
            partitioned: Arc::new(Mutex::new(HashSet::new())),
            answer_timeout,
        }
    }

    #[must_use]
    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            network: self.clone(),
        }
    }

    /// Make calls to `id` fail until [`heal`](Self::heal) is called.
    pub fn partition(&self, id: &ParticipantId) {
        self.partitioned.lock().insert(id.clone());
    }

    pub fn heal(&self, id: &ParticipantId) {
        self.partitioned.lock().remove(id);
    }

    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Links currently terminating at `viewer`
    #[must_use]
    pub fn links_to(&self, viewer: &ParticipantId) -> usize {
        self.links
            .iter()
            .filter(|entry| entry.value().1 == *viewer)
            .count()
    }
}

impl std::fmt::Debug for LocalPeerNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPeerNetwork")
            .field("endpoints", &self.endpoints.len())
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

/// Peer-transport initialisation against a [`LocalPeerNetwork`]
pub struct LocalConnector {
    network: LocalPeerNetwork,
}

#[async_trait]
impl PeerConnector for LocalConnector {
    async fn connect(&self) -> Result<PeerSession> {
        let id = ParticipantId::new();
        let (tx, incoming) = mpsc::unbounded_channel();
        self.network.endpoints.insert(id.clone(), tx);
        info!(peer_id = %id, "Peer endpoint registered");

        Ok(PeerSession {
            transport: Arc::new(LocalEndpoint {
                id,
                network: self.network.clone(),
                destroyed: AtomicBool::new(false),
            }),
            incoming,
        })
    }
}

struct LocalEndpoint {
    id: ParticipantId,
    network: LocalPeerNetwork,
    destroyed: AtomicBool,
}

#[async_trait]
impl PeerTransport for LocalEndpoint {
    fn local_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn call(&self, target: &ParticipantId, stream: MediaStream) -> Result<MediaLink> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::Link("Local endpoint destroyed".to_string()));
        }
        if self.network.partitioned.lock().contains(target) {
            return Err(Error::Link(format!("{target} is unreachable")));
        }
        let endpoint = self
            .network
            .endpoints
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Link(format!("{target} is not on the network")))?;

        let link_id = LinkId::new();
        let (call, answer) = IncomingCall::new(link_id.clone(), self.id.clone(), stream.clone());
        endpoint
            .send(call)
            .map_err(|_| Error::Link(format!("{target} stopped accepting calls")))?;

        match tokio::time::timeout(self.network.answer_timeout, answer).await {
            Ok(Ok(CallAnswer::Accepted)) => {
                self.network
                    .links
                    .insert(link_id.clone(), (self.id.clone(), target.clone()));
                debug!(caller = %self.id, callee = %target, link_id = %link_id, "Call answered");
                Ok(MediaLink {
                    id: link_id,
                    viewer: target.clone(),
                    stream,
                })
            }
            Ok(Ok(CallAnswer::Declined) | Err(_)) => {
                Err(Error::Link(format!("{target} declined the call")))
            }
            Err(_) => Err(Error::Link(format!("{target} did not answer in time"))),
        }
    }

    fn hang_up(&self, link_id: &LinkId) {
        if self.network.links.remove(link_id).is_some() {
            debug!(link_id = %link_id, "Link closed");
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.network.endpoints.remove(&self.id);
        self.network
            .links
            .retain(|_, (caller, callee)| *caller != self.id && *callee != self.id);
        info!(peer_id = %self.id, "Peer endpoint destroyed");
    }
}
