//! Host actor: owns the media element, the authoritative state and every
//! outbound media link.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{session_closed, ConnectedSession, SessionContext};
use crate::{
    media::{MediaEvent, MediaPlayer, MediaSource, MediaStream},
    models::{Participant, ParticipantId, RoomId, SyncState},
    service::{
        ChatEntry, ChatRelay, DialOutcome, HostPhase, HostSync, PeerLinkManager, RosterView,
    },
    signaling::{EventKind, EventReceiver, SignalEvent},
    Result,
};

const HOST_EVENTS: &[EventKind] = &[
    EventKind::UpdateUserList,
    EventKind::UserConnected,
    EventKind::AskSyncData,
    EventKind::ReceiveMessage,
    EventKind::HostNameRequested,
];

/// What the host UI renders
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub room_id: RoomId,
    pub local_id: ParticipantId,
    pub display_name: String,
    pub phase: HostPhase,
    pub state: Option<SyncState>,
    pub position_seconds: f64,
    /// Viewers, annotated with the link serving them
    pub viewers: Vec<Participant>,
    pub chat: Vec<ChatEntry>,
    /// Last capability failure, shown once to the host
    pub last_error: Option<String>,
}

enum HostCommand {
    LoadMedia(MediaSource, oneshot::Sender<Result<()>>),
    StartBroadcast(oneshot::Sender<Result<()>>),
    StopBroadcast,
    Play,
    Pause,
    Seek(f64),
    Kick(ParticipantId),
    SendChat(String, oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Handle to a running host session
pub struct HostHandle {
    local_id: ParticipantId,
    commands: mpsc::UnboundedSender<HostCommand>,
    snapshot: watch::Receiver<HostSnapshot>,
    task: JoinHandle<()>,
}

impl ConnectedSession {
    /// Take the host role in `room_id`.
    pub fn host(
        self,
        room_id: RoomId,
        player: Box<dyn MediaPlayer>,
        media_events: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> HostHandle {
        let (ctx, peer) = self.into_parts(room_id);
        // Hosts never accept calls.
        drop(peer.incoming);

        let signals = ctx.signaling.subscribe(HOST_EVENTS);
        let (links, dial_outcomes) = PeerLinkManager::new(ctx.transport.clone(), &ctx.config.sync);
        let sync = HostSync::new(
            ctx.room_id.clone(),
            ctx.identity.display_name().to_string(),
            ctx.config.sync.capture_frame_rate,
        );
        let chat = ChatRelay::new(
            ctx.room_id.clone(),
            ctx.identity.display_name(),
            ctx.config.relay.max_chat_length,
        );
        let (commands, command_rx) = mpsc::unbounded_channel();

        let mut actor = HostActor {
            ctx,
            sync,
            player,
            media_events,
            links,
            dial_outcomes,
            roster: RosterView::default(),
            chat,
            signals,
            commands: command_rx,
            snapshot: None,
            stream: None,
            last_error: None,
        };
        let (snapshot_tx, snapshot) = watch::channel(actor.build_snapshot());
        actor.snapshot = Some(snapshot_tx);
        let local_id = actor.ctx.local_id.clone();
        let task = tokio::spawn(actor.run());

        HostHandle {
            local_id,
            commands,
            snapshot,
            task,
        }
    }
}

impl HostHandle {
    #[must_use]
    pub const fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub async fn load_media(&self, source: MediaSource) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(HostCommand::LoadMedia(source, tx))?;
        rx.await.map_err(|_| session_closed())?
    }

    /// Start broadcasting. A capability failure is returned here and nothing
    /// is published to the room.
    pub async fn start_broadcast(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(HostCommand::StartBroadcast(tx))?;
        rx.await.map_err(|_| session_closed())?
    }

    pub fn stop_broadcast(&self) -> Result<()> {
        self.send(HostCommand::StopBroadcast)
    }

    pub fn play(&self) -> Result<()> {
        self.send(HostCommand::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(HostCommand::Pause)
    }

    pub fn seek(&self, position_seconds: f64) -> Result<()> {
        self.send(HostCommand::Seek(position_seconds))
    }

    pub fn kick(&self, participant_id: ParticipantId) -> Result<()> {
        self.send(HostCommand::Kick(participant_id))
    }

    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(HostCommand::SendChat(text.to_string(), tx))?;
        rx.await.map_err(|_| session_closed())?
    }

    #[must_use]
    pub fn snapshot(&self) -> HostSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HostSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&HostSnapshot) -> bool,
    ) -> Result<HostSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(predicate).await.map_err(|_| session_closed())?;
        Ok((*snapshot).clone())
    }

    /// Stop broadcasting, leave the room and wait for the actor to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(HostCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Host session task failed");
        }
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| session_closed())
    }
}

struct HostActor {
    ctx: SessionContext,
    sync: HostSync,
    player: Box<dyn MediaPlayer>,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    links: PeerLinkManager,
    dial_outcomes: mpsc::UnboundedReceiver<DialOutcome>,
    roster: RosterView,
    chat: ChatRelay,
    signals: EventReceiver,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    snapshot: Option<watch::Sender<HostSnapshot>>,
    stream: Option<MediaStream>,
    last_error: Option<String>,
}

impl HostActor {
    async fn run(mut self) {
        info!(room_id = %self.ctx.room_id, host_id = %self.ctx.local_id, "Hosting room");
        self.ctx
            .emit(SignalEvent::HostJoined {
                room_id: self.ctx.room_id.clone(),
                transport_id: self.ctx.local_id.clone(),
                display_name: self.ctx.identity.display_name().to_string(),
            })
            .await;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(HostCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(event) = self.signals.recv() => self.handle_signal(event).await,
                Some(event) = self.media_events.recv() => {
                    if let Some(sync) = self.sync.on_media_event(event, self.player.as_ref()) {
                        self.ctx.emit(sync).await;
                    }
                }
                Some(outcome) = self.dial_outcomes.recv() => {
                    self.links.handle_outcome(outcome);
                }
            }
            self.publish_snapshot();
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::LoadMedia(source, reply) => {
                let result = self.sync.load_media(self.player.as_mut(), source);
                let _ = reply.send(result);
            }
            HostCommand::StartBroadcast(reply) => {
                let result = self.start_broadcast().await;
                let _ = reply.send(result);
            }
            HostCommand::StopBroadcast => self.stop_broadcast().await,
            HostCommand::Play => {
                self.player.grant_user_activation();
                if let Err(e) = self.player.play() {
                    warn!(error = %e, "Host playback failed");
                }
            }
            HostCommand::Pause => self.player.pause(),
            HostCommand::Seek(position) => self.player.seek(position),
            HostCommand::Kick(target_id) => {
                info!(room_id = %self.ctx.room_id, target_id = %target_id, "Kicking participant");
                self.links.drop_viewer(&target_id);
                self.ctx
                    .emit(SignalEvent::KickUser {
                        room_id: self.ctx.room_id.clone(),
                        target_id,
                    })
                    .await;
            }
            HostCommand::SendChat(text, reply) => {
                let result = match self.chat.send(&text) {
                    Ok(event) => {
                        self.ctx.emit(event).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            HostCommand::Shutdown => {}
        }
    }

    async fn start_broadcast(&mut self) -> Result<()> {
        let (stream, events) = match self.sync.start_broadcast(self.player.as_mut()) {
            Ok(started) => started,
            Err(e) => {
                if e.is_user_facing() {
                    self.last_error = Some(e.to_string());
                }
                warn!(room_id = %self.ctx.room_id, error = %e, "Broadcast did not start");
                return Err(e);
            }
        };
        self.last_error = None;
        self.ctx.emit_all(events).await;

        // Viewers already present get dialed without waiting for their
        // next announcement.
        for viewer in self.roster.viewers(&self.ctx.local_id) {
            self.links.request_dial(viewer.id, &stream);
        }
        self.stream = Some(stream);
        Ok(())
    }

    async fn stop_broadcast(&mut self) {
        let events = self.sync.stop_broadcast(self.player.as_mut());
        if events.is_empty() {
            return;
        }
        self.links.close_all();
        self.stream = None;
        self.ctx.emit_all(events).await;
    }

    async fn handle_signal(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::UpdateUserList { participants } => {
                let before = self.roster.viewers(&self.ctx.local_id);
                self.roster.apply(participants);
                for gone in before.iter().filter(|p| self.roster.get(&p.id).is_none()) {
                    debug!(participant_id = %gone.id, "Viewer left, dropping link");
                    self.links.drop_viewer(&gone.id);
                }
            }
            SignalEvent::UserConnected { participant_id } => match &self.stream {
                Some(stream) => {
                    self.links.request_dial(participant_id, stream);
                }
                None => {
                    debug!(participant_id = %participant_id, "Viewer announced before broadcast")
                }
            },
            SignalEvent::AskSyncData { requester_id } => {
                if let Some(reply) = self
                    .sync
                    .answer_sync_request(requester_id, self.player.as_ref())
                {
                    self.ctx.emit(reply).await;
                }
            }
            SignalEvent::ReceiveMessage { message } => {
                self.chat.on_receive(message);
            }
            SignalEvent::HostNameRequested { requester_id } => {
                self.ctx
                    .emit(SignalEvent::ReturnHostName {
                        target_id: requester_id,
                        name: self.ctx.identity.display_name().to_string(),
                    })
                    .await;
            }
            other => debug!(event_type = other.event_type(), "Unhandled host event"),
        }
    }

    async fn teardown(&mut self) {
        self.stop_broadcast().await;
        self.links.close_all();
        self.ctx.emit(SignalEvent::LeaveRoom).await;
        self.ctx.transport.destroy();
        self.publish_snapshot();
        info!(room_id = %self.ctx.room_id, "Host session closed");
    }

    fn build_snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            room_id: self.ctx.room_id.clone(),
            local_id: self.ctx.local_id.clone(),
            display_name: self.ctx.identity.display_name().to_string(),
            phase: self.sync.phase(),
            state: self.sync.state().cloned(),
            position_seconds: self.player.position(),
            viewers: self.roster.viewers_with_links(&self.ctx.local_id, |id| {
                self.links.link_for(id).map(|link| link.id.clone())
            }),
            chat: self.chat.entries().to_vec(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish_snapshot(&self) {
        if let Some(tx) = &self.snapshot {
            tx.send_replace(self.build_snapshot());
        }
    }
}
