//! Direct media links between the host and each viewer
//!
//! The host dials every viewer that announces itself, at most once per
//! cool-down window. Viewers announce periodically until they accept a link.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::SyncConfig,
    media::MediaStream,
    models::{LinkId, ParticipantId},
    Result,
};

/// An established host→viewer media link
#[derive(Debug, Clone)]
pub struct MediaLink {
    pub id: LinkId,
    pub viewer: ParticipantId,
    pub stream: MediaStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAnswer {
    Accepted,
    Declined,
}

/// A call offered to a viewer. Dropping it without answering counts as a
/// decline.
#[derive(Debug)]
pub struct IncomingCall {
    pub link_id: LinkId,
    pub caller: ParticipantId,
    stream: MediaStream,
    responder: oneshot::Sender<CallAnswer>,
}

impl IncomingCall {
    #[must_use]
    pub fn new(
        link_id: LinkId,
        caller: ParticipantId,
        stream: MediaStream,
    ) -> (Self, oneshot::Receiver<CallAnswer>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                link_id,
                caller,
                stream,
                responder,
            },
            rx,
        )
    }

    /// Accept the call and take the host's stream.
    pub fn answer(self) -> MediaStream {
        let _ = self.responder.send(CallAnswer::Accepted);
        self.stream
    }

    pub fn decline(self) {
        let _ = self.responder.send(CallAnswer::Declined);
    }
}

/// One participant's endpoint on the peer network.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Transport-assigned identifier of this endpoint
    fn local_id(&self) -> &ParticipantId;

    /// One call-and-answer handshake carrying `stream` to `target`.
    async fn call(&self, target: &ParticipantId, stream: MediaStream) -> Result<MediaLink>;

    fn hang_up(&self, link_id: &LinkId);

    /// Leave the peer network; no further calls can be placed or received.
    fn destroy(&self);
}

/// A ready peer endpoint and the calls offered to it
pub struct PeerSession {
    pub transport: Arc<dyn PeerTransport>,
    pub incoming: mpsc::UnboundedReceiver<IncomingCall>,
}

/// Peer-transport initialisation. Must complete before a room is joined.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self) -> Result<PeerSession>;
}

/// Progress of a dial task, reported back to the owning event loop
#[derive(Debug)]
pub enum DialOutcome {
    Linked { epoch: u64, link: MediaLink },
    Failed { epoch: u64, viewer: ParticipantId, error: String },
    Released { epoch: u64, viewer: ParticipantId },
}

impl DialOutcome {
    const fn epoch(&self) -> u64 {
        match self {
            Self::Linked { epoch, .. }
            | Self::Failed { epoch, .. }
            | Self::Released { epoch, .. } => *epoch,
        }
    }
}

/// Host-side dial bookkeeping. Owned by the host event loop; dial tasks only
/// report back through [`DialOutcome`]s.
pub struct PeerLinkManager {
    transport: Arc<dyn PeerTransport>,
    jitter: Duration,
    cooldown: Duration,
    in_flight: HashSet<ParticipantId>,
    links: HashMap<ParticipantId, MediaLink>,
    outcomes: mpsc::UnboundedSender<DialOutcome>,
    cancel: CancellationToken,
    /// Bumped by `close_all` so reports from an earlier broadcast are ignored
    epoch: u64,
}

impl PeerLinkManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        config: &SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DialOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let manager = Self {
            transport,
            jitter: config.dial_jitter(),
            cooldown: config.dial_cooldown(),
            in_flight: HashSet::new(),
            links: HashMap::new(),
            outcomes,
            cancel: CancellationToken::new(),
            epoch: 0,
        };
        (manager, rx)
    }

    /// Dial `viewer` unless a dial to it is already in flight. Returns whether
    /// a dial was started.
    pub fn request_dial(&mut self, viewer: ParticipantId, stream: &MediaStream) -> bool {
        if viewer == *self.transport.local_id() {
            return false;
        }
        if !self.in_flight.insert(viewer.clone()) {
            debug!(viewer = %viewer, "Dial already in flight, skipping");
            return false;
        }

        let transport = self.transport.clone();
        let outcomes = self.outcomes.clone();
        let token = self.cancel.child_token();
        let delay = jitter_delay(self.jitter);
        let cooldown = self.cooldown;
        let epoch = self.epoch;
        let stream = stream.clone();

        debug!(viewer = %viewer, delay_ms = delay.as_millis() as u64, "Dial scheduled");

        tokio::spawn(async move {
            // Let the viewer's receiving side finish initializing.
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let cooldown_ends = Instant::now() + cooldown;
            let result = tokio::select! {
                () = token.cancelled() => return,
                result = transport.call(&viewer, stream) => result,
            };

            let report = match result {
                Ok(link) => DialOutcome::Linked { epoch, link },
                Err(e) => DialOutcome::Failed {
                    epoch,
                    viewer: viewer.clone(),
                    error: e.to_string(),
                },
            };
            if outcomes.send(report).is_err() {
                return;
            }

            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(cooldown_ends) => {
                    let _ = outcomes.send(DialOutcome::Released { epoch, viewer });
                }
            }
        });

        true
    }

    /// Apply a dial report. Returns the new link when one was established.
    pub fn handle_outcome(&mut self, outcome: DialOutcome) -> Option<&MediaLink> {
        if outcome.epoch() != self.epoch {
            debug!("Ignoring dial report from a previous broadcast");
            if let DialOutcome::Linked { link, .. } = outcome {
                self.transport.hang_up(&link.id);
            }
            return None;
        }

        match outcome {
            DialOutcome::Linked { link, .. } => {
                info!(viewer = %link.viewer, link_id = %link.id, "Media link established");
                let viewer = link.viewer.clone();
                if let Some(previous) = self.links.insert(viewer.clone(), link) {
                    self.transport.hang_up(&previous.id);
                }
                self.links.get(&viewer)
            }
            DialOutcome::Failed { viewer, error, .. } => {
                // Retried on the viewer's next announcement.
                warn!(viewer = %viewer, error = %error, "Dial failed");
                None
            }
            DialOutcome::Released { viewer, .. } => {
                self.in_flight.remove(&viewer);
                None
            }
        }
    }

    /// Hang up the link to a viewer that left or was kicked.
    pub fn drop_viewer(&mut self, viewer: &ParticipantId) {
        if let Some(link) = self.links.remove(viewer) {
            self.transport.hang_up(&link.id);
        }
    }

    /// Cancel pending dials and hang up every link.
    pub fn close_all(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.epoch += 1;
        self.in_flight.clear();
        for (_, link) in self.links.drain() {
            self.transport.hang_up(&link.id);
        }
    }

    #[must_use]
    pub fn link_for(&self, viewer: &ParticipantId) -> Option<&MediaLink> {
        self.links.get(viewer)
    }

    #[must_use]
    pub fn is_in_flight(&self, viewer: &ParticipantId) -> bool {
        self.in_flight.contains(viewer)
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl Drop for PeerLinkManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Uniform delay in `[max / 2, max]`
fn jitter_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(max_ms / 2..=max_ms))
}

/// Viewer-side presence announcement timer.
///
/// Cancelling is idempotent: only the first `cancel` after a `start` reports
/// `true`.
#[derive(Debug)]
pub struct AnnounceTimer {
    period: Duration,
    ticker: Option<Interval>,
}

impl AnnounceTimer {
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            ticker: None,
        }
    }

    /// (Re)start announcing; the first tick fires one period from now.
    pub fn start(&mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    pub fn cancel(&mut self) -> bool {
        self.ticker.take().is_some()
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Resolves on the next tick; never resolves while stopped.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
