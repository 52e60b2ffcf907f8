//! Viewer actor: announces itself until the host's link arrives, then keeps
//! the local element in step with the host.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{session_closed, ConnectedSession, SessionContext};
use crate::{
    media::{MediaEvent, MediaPlayer},
    models::{Participant, ParticipantId, RoomId, SyncState},
    service::{
        AnnounceTimer, ChatEntry, ChatRelay, IncomingCall, RosterView, ViewerPhase, ViewerSync,
    },
    signaling::{EventKind, EventReceiver, SignalEvent},
    Result,
};

const VIEWER_EVENTS: &[EventKind] = &[
    EventKind::VideoSync,
    EventKind::BroadcastStopped,
    EventKind::StreamForcedRefresh,
    EventKind::Kicked,
    EventKind::UpdateUserList,
    EventKind::ReceiveMessage,
    EventKind::ReturnHostName,
];

/// What the viewer UI renders
#[derive(Debug, Clone)]
pub struct ViewerSnapshot {
    pub room_id: RoomId,
    pub local_id: ParticipantId,
    pub phase: ViewerPhase,
    pub position_seconds: f64,
    pub muted: bool,
    pub locally_paused: bool,
    pub host_state: Option<SyncState>,
    pub host_name: Option<String>,
    pub roster: Vec<Participant>,
    pub chat: Vec<ChatEntry>,
    pub announcing: bool,
}

enum ViewerCommand {
    Gesture,
    Play,
    Pause,
    SendChat(String, oneshot::Sender<Result<()>>),
    AskHostName,
    Shutdown,
}

/// Handle to a running viewer session
pub struct ViewerHandle {
    local_id: ParticipantId,
    commands: mpsc::UnboundedSender<ViewerCommand>,
    snapshot: watch::Receiver<ViewerSnapshot>,
    task: JoinHandle<()>,
}

impl ConnectedSession {
    /// Join `room_id` as a viewer.
    pub fn join(
        self,
        room_id: RoomId,
        player: Box<dyn MediaPlayer>,
        media_events: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> ViewerHandle {
        let (ctx, peer) = self.into_parts(room_id);
        let signals = ctx.signaling.subscribe(VIEWER_EVENTS);
        let sync = ViewerSync::new(ctx.room_id.clone(), ctx.local_id.clone(), &ctx.config.sync);
        let chat = ChatRelay::new(
            ctx.room_id.clone(),
            ctx.identity.display_name(),
            ctx.config.relay.max_chat_length,
        );
        let announce = AnnounceTimer::new(ctx.config.sync.announce_interval());
        let (commands, command_rx) = mpsc::unbounded_channel();

        let mut actor = ViewerActor {
            ctx,
            sync,
            player,
            media_events,
            incoming: peer.incoming,
            announce,
            roster: RosterView::default(),
            chat,
            host_name: None,
            signals,
            commands: command_rx,
            snapshot: None,
        };
        let (snapshot_tx, snapshot) = watch::channel(actor.build_snapshot());
        actor.snapshot = Some(snapshot_tx);
        let local_id = actor.ctx.local_id.clone();
        let task = tokio::spawn(actor.run());

        ViewerHandle {
            local_id,
            commands,
            snapshot,
            task,
        }
    }
}

impl ViewerHandle {
    #[must_use]
    pub const fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// The user clicked the unmute prompt.
    pub fn gesture(&self) -> Result<()> {
        self.send(ViewerCommand::Gesture)
    }

    pub fn play(&self) -> Result<()> {
        self.send(ViewerCommand::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(ViewerCommand::Pause)
    }

    pub fn ask_host_name(&self) -> Result<()> {
        self.send(ViewerCommand::AskHostName)
    }

    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(ViewerCommand::SendChat(text.to_string(), tx))?;
        rx.await.map_err(|_| session_closed())?
    }

    #[must_use]
    pub fn snapshot(&self) -> ViewerSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ViewerSnapshot) -> bool,
    ) -> Result<ViewerSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(predicate).await.map_err(|_| session_closed())?;
        Ok((*snapshot).clone())
    }

    /// Whether the actor has stopped (shutdown or kicked).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Leave the room and wait for the actor to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(ViewerCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Viewer session task failed");
        }
    }

    fn send(&self, command: ViewerCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| session_closed())
    }
}

struct ViewerActor {
    ctx: SessionContext,
    sync: ViewerSync,
    player: Box<dyn MediaPlayer>,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    incoming: mpsc::UnboundedReceiver<IncomingCall>,
    announce: AnnounceTimer,
    roster: RosterView,
    chat: ChatRelay,
    host_name: Option<String>,
    signals: EventReceiver,
    commands: mpsc::UnboundedReceiver<ViewerCommand>,
    snapshot: Option<watch::Sender<ViewerSnapshot>>,
}

/// Why the event loop stopped
enum Exit {
    Shutdown,
    Kicked,
}

impl ViewerActor {
    async fn run(mut self) {
        info!(room_id = %self.ctx.room_id, viewer_id = %self.ctx.local_id, "Joining room");
        self.announce_presence().await;
        self.announce.start();

        let exit = loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(ViewerCommand::Shutdown) | None => break Exit::Shutdown,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(event) = self.signals.recv() => {
                    if !self.handle_signal(event).await {
                        break Exit::Kicked;
                    }
                }
                Some(event) = self.media_events.recv() => {
                    let out = self.sync.on_local_media_event(event, Instant::now());
                    self.ctx.emit_all(out).await;
                }
                Some(call) = self.incoming.recv() => self.handle_call(call).await,
                () = self.announce.tick() => {
                    debug!(room_id = %self.ctx.room_id, "Re-announcing presence");
                    self.announce_presence().await;
                }
            }
            self.publish_snapshot();
        };

        match exit {
            Exit::Shutdown => {
                if self.announce.cancel() {
                    debug!("Announce timer cancelled on teardown");
                }
                self.ctx.emit(SignalEvent::LeaveRoom).await;
                self.ctx.transport.destroy();
                info!(room_id = %self.ctx.room_id, "Viewer session closed");
            }
            Exit::Kicked => {}
        }
        self.publish_snapshot();
    }

    async fn announce_presence(&mut self) {
        self.ctx.emit(self.ctx.join_room_event()).await;
    }

    async fn handle_command(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::Gesture => {
                let out = self.sync.on_gesture(self.player.as_mut(), Instant::now());
                self.ctx.emit_all(out).await;
            }
            ViewerCommand::Play => {
                self.player.grant_user_activation();
                if let Err(e) = self.player.play() {
                    debug!(error = %e, "Local play rejected");
                }
            }
            ViewerCommand::Pause => self.player.pause(),
            ViewerCommand::SendChat(text, reply) => {
                let result = match self.chat.send(&text) {
                    Ok(event) => {
                        self.ctx.emit(event).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            ViewerCommand::AskHostName => {
                self.ctx
                    .emit(SignalEvent::AskHostName {
                        room_id: self.ctx.room_id.clone(),
                    })
                    .await;
            }
            ViewerCommand::Shutdown => {}
        }
    }

    async fn handle_call(&mut self, call: IncomingCall) {
        if !self.sync.accept_call(call.link_id.clone()) {
            call.decline();
            return;
        }
        // First accepted link stops the announcements.
        if self.announce.cancel() {
            debug!("Announce timer cancelled on accepted link");
        }
        let stream = call.answer();
        let out = self.sync.on_stream(self.player.as_mut(), stream);
        self.ctx.emit_all(out).await;
    }

    /// Returns `false` once the viewer was kicked and must stop.
    async fn handle_signal(&mut self, event: SignalEvent) -> bool {
        match event {
            SignalEvent::VideoSync {
                mode,
                position_seconds,
                origin_timestamp,
                target_id,
                ..
            } => {
                let state = SyncState {
                    mode,
                    position_seconds,
                    origin_timestamp,
                };
                let out = self.sync.on_video_sync(
                    state,
                    target_id.as_ref(),
                    self.player.as_mut(),
                    Instant::now(),
                );
                self.ctx.emit_all(out).await;
            }
            SignalEvent::BroadcastStopped { .. } => {
                // Wait passively for a forced refresh.
                self.sync.on_broadcast_stopped(self.player.as_mut());
            }
            SignalEvent::StreamForcedRefresh { .. } => {
                if self.sync.on_forced_refresh(self.player.as_mut()) {
                    self.announce_presence().await;
                    self.announce.start();
                }
            }
            SignalEvent::Kicked => {
                if self.sync.on_kicked(self.player.as_mut()) {
                    self.announce.cancel();
                    self.ctx.transport.destroy();
                    self.ctx.emit(SignalEvent::LeaveRoom).await;
                    return false;
                }
            }
            SignalEvent::UpdateUserList { participants } => self.roster.apply(participants),
            SignalEvent::ReceiveMessage { message } => {
                self.chat.on_receive(message);
            }
            SignalEvent::ReturnHostName { target_id, name } => {
                if target_id == self.ctx.local_id {
                    self.host_name = Some(name);
                }
            }
            other => debug!(event_type = other.event_type(), "Unhandled viewer event"),
        }
        true
    }

    fn build_snapshot(&self) -> ViewerSnapshot {
        ViewerSnapshot {
            room_id: self.ctx.room_id.clone(),
            local_id: self.ctx.local_id.clone(),
            phase: self.sync.phase(),
            position_seconds: self.player.position(),
            muted: self.player.is_muted(),
            locally_paused: self.sync.is_locally_paused(),
            host_state: self.sync.host_state().cloned(),
            host_name: self.host_name.clone(),
            roster: self.roster.participants().to_vec(),
            chat: self.chat.entries().to_vec(),
            announcing: self.announce.is_running(),
        }
    }

    fn publish_snapshot(&self) {
        if let Some(tx) = &self.snapshot {
            tx.send_replace(self.build_snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::Config;
    use crate::media::{AutoplayPolicy, MediaStream, SimulatedPlayer};
    use crate::models::{LinkId, SyncMode};
    use crate::service::{CallAnswer, WatchStatus};
    use crate::session::Session;
    use crate::test_helpers::{
        test_room_id, RecordingSignaling, ScriptedConnector, ScriptedPeerTransport,
    };

    struct Fixture {
        handle: ViewerHandle,
        signaling: Arc<RecordingSignaling>,
        transport: Arc<ScriptedPeerTransport>,
        calls: mpsc::UnboundedSender<IncomingCall>,
        player: SimulatedPlayer,
    }

    async fn joining() -> Fixture {
        let signaling = RecordingSignaling::new();
        let (connector, transport, calls) = ScriptedConnector::new("viewer1");
        let session = Session::login("alice", Config::default(), signaling.clone())
            .unwrap()
            .connect(&connector)
            .await
            .unwrap();
        let (player, events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let handle = session.join(test_room_id("room1"), Box::new(player.clone()), events);
        Fixture {
            handle,
            signaling,
            transport,
            calls,
            player,
        }
    }

    async fn offer(fixture: &Fixture) -> CallAnswer {
        let (call, answer) = IncomingCall::new(
            LinkId::new(),
            ParticipantId::from("host"),
            MediaStream::new(30),
        );
        fixture.calls.send(call).unwrap();
        answer.await.unwrap_or(CallAnswer::Declined)
    }

    fn sync(mode: SyncMode, position_seconds: f64) -> SignalEvent {
        let state = SyncState::new(mode, position_seconds);
        SignalEvent::VideoSync {
            room_id: test_room_id("room1"),
            mode: state.mode,
            position_seconds: state.position_seconds,
            origin_timestamp: state.origin_timestamp,
            target_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_announces_until_link_accepted() {
        let fixture = joining().await;

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(fixture.signaling.count(EventKind::JoinRoom), 3);
        assert!(fixture.handle.snapshot().announcing);

        assert_eq!(offer(&fixture).await, CallAnswer::Accepted);
        let snapshot = fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)
            .await
            .unwrap();
        assert!(!snapshot.announcing);
        assert!(snapshot.muted);
        assert_eq!(fixture.signaling.count(EventKind::RequestSync), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fixture.signaling.count(EventKind::JoinRoom), 3);

        // Only one link per broadcast
        assert_eq!(offer(&fixture).await, CallAnswer::Declined);
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gesture_then_sync_converges() {
        let fixture = joining().await;
        offer(&fixture).await;
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)
            .await
            .unwrap();

        fixture.handle.gesture().unwrap();
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::Synced(WatchStatus::Watching))
            .await
            .unwrap();

        fixture.signaling.inject(sync(SyncMode::Play, 12.3));
        let snapshot = fixture
            .handle
            .wait_for(|s| s.host_state.is_some())
            .await
            .unwrap();
        assert!((snapshot.position_seconds - 12.3).abs() < 0.5);
        assert!(!snapshot.muted);
        assert_eq!(snapshot.phase, ViewerPhase::Synced(WatchStatus::Watching));
        assert_eq!(fixture.signaling.count(EventKind::ViewerStatusUpdate), 1);
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_pause_is_reported_once() {
        let fixture = joining().await;
        offer(&fixture).await;
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)
            .await
            .unwrap();
        fixture.handle.gesture().unwrap();
        fixture
            .handle
            .wait_for(|s| matches!(s.phase, ViewerPhase::Synced(_)))
            .await
            .unwrap();

        fixture.handle.pause().unwrap();
        let snapshot = fixture.handle.wait_for(|s| s.locally_paused).await.unwrap();
        assert_eq!(snapshot.phase, ViewerPhase::Synced(WatchStatus::Paused));
        assert!(fixture.player.is_paused());
        assert_eq!(fixture.signaling.count(EventKind::ViewerStatusUpdate), 2);
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_right_after_host_resume() {
        let fixture = joining().await;
        offer(&fixture).await;
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)
            .await
            .unwrap();
        fixture.handle.gesture().unwrap();

        fixture.signaling.inject(sync(SyncMode::Pause, 5.0));
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::Synced(WatchStatus::Paused))
            .await
            .unwrap();
        fixture.signaling.inject(sync(SyncMode::Play, 6.0));
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::Synced(WatchStatus::Watching))
            .await
            .unwrap();

        fixture.handle.pause().unwrap();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(1),
            fixture.handle.wait_for(|s| s.locally_paused),
        )
        .await
        .expect("pause was swallowed")
        .unwrap();
        assert_eq!(snapshot.phase, ViewerPhase::Synced(WatchStatus::Paused));

        fixture.signaling.inject(sync(SyncMode::Play, 7.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.player.is_paused());
        assert!(fixture.handle.snapshot().locally_paused);
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_keeps_accepted_link() {
        let fixture = joining().await;
        assert_eq!(offer(&fixture).await, CallAnswer::Accepted);
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)
            .await
            .unwrap();
        let announced = fixture.signaling.count(EventKind::JoinRoom);

        fixture.signaling.inject(SignalEvent::StreamForcedRefresh {
            room_id: test_room_id("room1"),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = fixture.handle.snapshot();
        assert_eq!(snapshot.phase, ViewerPhase::ReadyGesturePending);
        assert!(!snapshot.announcing);
        assert!(fixture.player.has_source());
        assert_eq!(fixture.signaling.count(EventKind::JoinRoom), announced);
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_stop_then_forced_refresh() {
        let fixture = joining().await;
        offer(&fixture).await;
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::ReadyGesturePending)
            .await
            .unwrap();

        fixture.signaling.inject(SignalEvent::BroadcastStopped {
            room_id: test_room_id("room1"),
        });
        fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::Ended)
            .await
            .unwrap();
        assert!(!fixture.player.has_source());
        let announced = fixture.signaling.count(EventKind::JoinRoom);

        fixture.signaling.inject(SignalEvent::StreamForcedRefresh {
            room_id: test_room_id("room1"),
        });
        let snapshot = fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::AwaitingLink)
            .await
            .unwrap();
        assert!(snapshot.announcing);
        assert_eq!(fixture.signaling.count(EventKind::JoinRoom), announced + 1);

        assert_eq!(offer(&fixture).await, CallAnswer::Accepted);
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_is_terminal() {
        let fixture = joining().await;
        offer(&fixture).await;

        fixture.signaling.inject(SignalEvent::Kicked);
        fixture.signaling.inject(SignalEvent::Kicked);
        let snapshot = fixture
            .handle
            .wait_for(|s| s.phase == ViewerPhase::Kicked)
            .await
            .unwrap();
        assert!(!snapshot.announcing);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fixture.handle.is_finished());
        assert!(fixture.transport.is_destroyed());
        assert!(!fixture.player.has_source());
        assert_eq!(fixture.signaling.count(EventKind::LeaveRoom), 1);
        assert!(fixture.handle.gesture().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_name_lookup() {
        let fixture = joining().await;

        fixture.handle.ask_host_name().unwrap();
        assert!(fixture.signaling.wait_for_count(EventKind::AskHostName, 1).await);

        fixture.signaling.inject(SignalEvent::ReturnHostName {
            target_id: ParticipantId::from("someone-else"),
            name: "wrong".to_string(),
        });
        fixture.signaling.inject(SignalEvent::ReturnHostName {
            target_id: ParticipantId::from("viewer1"),
            name: "hostname".to_string(),
        });
        let snapshot = fixture
            .handle
            .wait_for(|s| s.host_name.is_some())
            .await
            .unwrap();
        assert_eq!(snapshot.host_name.as_deref(), Some("hostname"));
        fixture.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_room() {
        let fixture = joining().await;
        fixture.handle.send_chat("hi all").await.unwrap();
        let Fixture {
            handle,
            signaling,
            transport,
            ..
        } = fixture;

        handle.shutdown().await;
        assert_eq!(signaling.count(EventKind::SendMessage), 1);
        assert_eq!(signaling.count(EventKind::LeaveRoom), 1);
        assert!(transport.is_destroyed());
    }
}
