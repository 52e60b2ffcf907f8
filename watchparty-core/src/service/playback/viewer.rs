//! Viewer side: `AWAITING_LINK → LINK_ESTABLISHED → READY_GESTURE_PENDING →
//! SYNCED{WATCHING, PAUSED} → ENDED | KICKED`

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::EchoGuard;
use crate::{
    config::SyncConfig,
    media::{MediaEvent, MediaPlayer, MediaStream},
    models::{LinkId, ParticipantId, RoomId, SyncMode, SyncState, ViewerStatus},
    signaling::SignalEvent,
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    Watching,
    Paused,
}

impl From<WatchStatus> for ViewerStatus {
    fn from(status: WatchStatus) -> Self {
        match status {
            WatchStatus::Watching => Self::Live,
            WatchStatus::Paused => Self::Paused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    AwaitingLink,
    /// Incoming link accepted, stream not attached yet
    LinkEstablished,
    /// Stream attached and muted until the user interacts
    ReadyGesturePending,
    Synced(WatchStatus),
    Ended,
    Kicked,
}

#[derive(Debug)]
pub struct ViewerSync {
    room_id: RoomId,
    local_id: ParticipantId,
    drift_tolerance: f64,
    phase: ViewerPhase,
    host_state: Option<SyncState>,
    locally_paused: bool,
    echo: EchoGuard,
    last_reported: Option<ViewerStatus>,
    link: Option<LinkId>,
}

impl ViewerSync {
    #[must_use]
    pub fn new(room_id: RoomId, local_id: ParticipantId, config: &SyncConfig) -> Self {
        Self {
            room_id,
            local_id,
            drift_tolerance: config.drift_tolerance_secs,
            phase: ViewerPhase::AwaitingLink,
            host_state: None,
            locally_paused: false,
            echo: EchoGuard::new(config.echo_window()),
            last_reported: None,
            link: None,
        }
    }

    /// Accept an incoming media link. Only the first link after (re)entering
    /// `AWAITING_LINK` is accepted.
    pub fn accept_call(&mut self, link_id: LinkId) -> bool {
        if self.phase == ViewerPhase::Kicked || self.link.is_some() {
            debug!(link_id = %link_id, phase = ?self.phase, "Declining incoming link");
            return false;
        }
        info!(room_id = %self.room_id, link_id = %link_id, "Incoming link accepted");
        self.link = Some(link_id);
        self.phase = ViewerPhase::LinkEstablished;
        true
    }

    /// Attach the host's stream muted and ask the host for its current state.
    pub fn on_stream(
        &mut self,
        player: &mut dyn MediaPlayer,
        stream: MediaStream,
    ) -> Vec<SignalEvent> {
        if self.phase != ViewerPhase::LinkEstablished {
            return Vec::new();
        }

        player.attach_stream(stream);
        player.set_muted(true);
        if let Err(e) = player.play() {
            // Fine: the gesture prompt covers it.
            debug!(error = %e, "Muted autoplay rejected");
        }
        self.phase = ViewerPhase::ReadyGesturePending;

        vec![SignalEvent::RequestSync {
            room_id: self.room_id.clone(),
        }]
    }

    /// The user clicked the unmute/play prompt.
    pub fn on_gesture(&mut self, player: &mut dyn MediaPlayer, now: Instant) -> Vec<SignalEvent> {
        if self.phase != ViewerPhase::ReadyGesturePending {
            return Vec::new();
        }
        player.grant_user_activation();
        player.set_muted(false);
        self.phase = ViewerPhase::Synced(WatchStatus::Watching);
        self.reconcile(player, now)
    }

    /// Handle an inbound `video-sync`. The state is cached in every live phase
    /// and applied immediately once synced.
    pub fn on_video_sync(
        &mut self,
        state: SyncState,
        target_id: Option<&ParticipantId>,
        player: &mut dyn MediaPlayer,
        now: Instant,
    ) -> Vec<SignalEvent> {
        if self.phase == ViewerPhase::Kicked {
            return Vec::new();
        }
        if target_id.is_some_and(|target| *target != self.local_id) {
            return Vec::new();
        }

        if let Some(cached) = &self.host_state {
            if !cached.is_superseded_by(&state) {
                debug!(
                    cached = %cached.origin_timestamp,
                    incoming = %state.origin_timestamp,
                    "Ignoring stale sync"
                );
                return Vec::new();
            }
            if cached.same_payload(&state) {
                self.host_state = Some(state);
                return Vec::new();
            }
        }

        debug!(
            mode = state.mode.as_str(),
            position = state.position_seconds,
            phase = ?self.phase,
            "Host state updated"
        );
        self.host_state = Some(state);

        match self.phase {
            ViewerPhase::Synced(_) => self.reconcile(player, now),
            _ => Vec::new(),
        }
    }

    /// Play/pause observed on the local element. Mutations the last syncs
    /// applied are swallowed by the echo guard; anything else is the user's
    /// and is reported to the room.
    pub fn on_local_media_event(&mut self, event: MediaEvent, now: Instant) -> Vec<SignalEvent> {
        let ViewerPhase::Synced(_) = self.phase else {
            return Vec::new();
        };
        let mode = match event {
            MediaEvent::Played => SyncMode::Play,
            MediaEvent::Paused => SyncMode::Pause,
            MediaEvent::Seeked { .. } | MediaEvent::Ended => return Vec::new(),
        };
        if self.echo.absorbs(mode, now) {
            return Vec::new();
        }

        match mode {
            SyncMode::Play => {
                self.locally_paused = false;
                self.phase = ViewerPhase::Synced(WatchStatus::Watching);
                self.report(ViewerStatus::Live)
            }
            SyncMode::Pause => {
                self.locally_paused = true;
                self.phase = ViewerPhase::Synced(WatchStatus::Paused);
                self.report(ViewerStatus::Paused)
            }
        }
    }

    /// The host ended the broadcast.
    pub fn on_broadcast_stopped(&mut self, player: &mut dyn MediaPlayer) {
        if self.phase == ViewerPhase::Kicked {
            return;
        }
        info!(room_id = %self.room_id, "Broadcast ended by host");
        player.clear_source();
        self.reset();
        self.phase = ViewerPhase::Ended;
    }

    /// The host restarted its stream. Only a viewer without a live link
    /// starts over; returns whether announcing should resume.
    pub fn on_forced_refresh(&mut self, player: &mut dyn MediaPlayer) -> bool {
        match self.phase {
            ViewerPhase::AwaitingLink | ViewerPhase::Ended => {}
            ViewerPhase::Kicked => return false,
            phase => {
                debug!(phase = ?phase, "Stream refresh ignored, link is live");
                return false;
            }
        }
        info!(room_id = %self.room_id, "Stream refresh requested");
        player.clear_source();
        self.reset();
        self.phase = ViewerPhase::AwaitingLink;
        true
    }

    /// Returns `false` when already kicked.
    pub fn on_kicked(&mut self, player: &mut dyn MediaPlayer) -> bool {
        if self.phase == ViewerPhase::Kicked {
            return false;
        }
        warn!(room_id = %self.room_id, "Removed from room by host");
        player.pause();
        player.clear_source();
        self.reset();
        self.phase = ViewerPhase::Kicked;
        true
    }

    fn reset(&mut self) {
        self.link = None;
        self.host_state = None;
        self.locally_paused = false;
        self.last_reported = None;
        self.echo.clear();
    }

    fn reconcile(&mut self, player: &mut dyn MediaPlayer, now: Instant) -> Vec<SignalEvent> {
        // Nothing heard yet: keep the live stream running where it is.
        let (mode, target) = match &self.host_state {
            Some(state) => (state.mode, Some(state.position_seconds)),
            None => (SyncMode::Play, None),
        };

        if let Some(target) = target {
            if (player.position() - target).abs() > self.drift_tolerance {
                player.seek(target);
            }
        }

        if mode == SyncMode::Pause {
            // Host and viewer agree again.
            self.locally_paused = false;
            return self.hold_paused(player, now);
        }
        if self.locally_paused {
            return self.hold_paused(player, now);
        }

        if player.is_paused() {
            self.echo.expect(SyncMode::Play, now);
            match player.play() {
                Ok(()) => {}
                Err(Error::Autoplay(reason)) => {
                    warn!(reason = %reason, "Playback rejected, falling back to muted");
                    player.set_muted(true);
                    if let Err(e) = player.play() {
                        debug!(error = %e, "Muted playback rejected as well");
                    }
                    self.phase = ViewerPhase::ReadyGesturePending;
                    return Vec::new();
                }
                Err(e) => {
                    warn!(error = %e, "Failed to resume playback");
                    return self.hold_paused(player, now);
                }
            }
        }
        self.phase = ViewerPhase::Synced(WatchStatus::Watching);
        self.report(ViewerStatus::Live)
    }

    fn hold_paused(&mut self, player: &mut dyn MediaPlayer, now: Instant) -> Vec<SignalEvent> {
        if !player.is_paused() {
            self.echo.expect(SyncMode::Pause, now);
            player.pause();
        }
        self.phase = ViewerPhase::Synced(WatchStatus::Paused);
        self.report(ViewerStatus::Paused)
    }

    fn report(&mut self, status: ViewerStatus) -> Vec<SignalEvent> {
        if self.last_reported == Some(status) {
            return Vec::new();
        }
        self.last_reported = Some(status);
        vec![SignalEvent::ViewerStatusUpdate {
            room_id: self.room_id.clone(),
            status,
        }]
    }

    #[must_use]
    pub const fn phase(&self) -> ViewerPhase {
        self.phase
    }

    #[must_use]
    pub const fn host_state(&self) -> Option<&SyncState> {
        self.host_state.as_ref()
    }

    #[must_use]
    pub const fn is_locally_paused(&self) -> bool {
        self.locally_paused
    }

    #[must_use]
    pub const fn link(&self) -> Option<&LinkId> {
        self.link.as_ref()
    }

    #[must_use]
    pub const fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AutoplayPolicy, MediaSource, SimulatedPlayer};
    use crate::signaling::EventKind;
    use crate::Result;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn viewer() -> ViewerSync {
        ViewerSync::new(
            RoomId::from("room1"),
            ParticipantId::from("viewer1"),
            &SyncConfig::default(),
        )
    }

    fn statuses(events: &[SignalEvent]) -> Vec<ViewerStatus> {
        events
            .iter()
            .filter_map(|event| match event {
                SignalEvent::ViewerStatusUpdate { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Feed everything the element reported so far back into the viewer.
    fn drain(
        viewer: &mut ViewerSync,
        events: &mut mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Vec<SignalEvent> {
        let mut outbound = Vec::new();
        while let Ok(event) = events.try_recv() {
            outbound.extend(viewer.on_local_media_event(event, Instant::now()));
        }
        outbound
    }

    /// A viewer past the gesture, watching the host's stream.
    fn watching() -> (ViewerSync, SimulatedPlayer, mpsc::UnboundedReceiver<MediaEvent>) {
        let (mut player, events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let mut viewer = viewer();
        assert!(viewer.accept_call(LinkId::from("link1")));
        viewer.on_stream(&mut player, MediaStream::new(30));
        viewer.on_gesture(&mut player, Instant::now());
        (viewer, player, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_gesture_then_sync() {
        let (mut player, _events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let mut viewer = viewer();

        assert!(viewer.accept_call(LinkId::from("link1")));
        assert_eq!(viewer.phase(), ViewerPhase::LinkEstablished);

        let out = viewer.on_stream(&mut player, MediaStream::new(30));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), EventKind::RequestSync);
        assert_eq!(viewer.phase(), ViewerPhase::ReadyGesturePending);
        assert!(player.is_muted());
        assert!(!player.is_paused());

        let out = viewer.on_gesture(&mut player, Instant::now());
        assert_eq!(statuses(&out), vec![ViewerStatus::Live]);
        assert!(!player.is_muted());

        let out = viewer.on_video_sync(
            SyncState::new(SyncMode::Play, 12.3),
            None,
            &mut player,
            Instant::now(),
        );
        assert!(out.is_empty());
        assert!((player.position() - 12.3).abs() < 0.5);
        assert_eq!(viewer.phase(), ViewerPhase::Synced(WatchStatus::Watching));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_before_gesture_is_cached() {
        let (mut player, _events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let mut viewer = viewer();
        viewer.accept_call(LinkId::from("link1"));
        viewer.on_stream(&mut player, MediaStream::new(30));

        let out = viewer.on_video_sync(
            SyncState::new(SyncMode::Pause, 20.0),
            Some(&ParticipantId::from("viewer1")),
            &mut player,
            Instant::now(),
        );
        assert!(out.is_empty());
        assert!(player.position() < 1.0);
        assert_eq!(viewer.phase(), ViewerPhase::ReadyGesturePending);

        let out = viewer.on_gesture(&mut player, Instant::now());
        assert_eq!(statuses(&out), vec![ViewerStatus::Paused]);
        assert!(player.is_paused());
        assert!((player.position() - 20.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_pause_snaps_watching_viewer() {
        let (mut viewer, mut player, _events) = watching();
        tokio::time::advance(Duration::from_secs(38)).await;

        let out = viewer.on_video_sync(
            SyncState::new(SyncMode::Pause, 40.0),
            None,
            &mut player,
            Instant::now(),
        );
        assert_eq!(statuses(&out), vec![ViewerStatus::Paused]);
        assert_eq!(viewer.phase(), ViewerPhase::Synced(WatchStatus::Paused));
        assert!(player.is_paused());
        assert!((player.position() - 40.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_drift_is_not_corrected() {
        let (mut viewer, mut player, _events) = watching();
        tokio::time::advance(Duration::from_secs(10)).await;

        viewer.on_video_sync(
            SyncState::new(SyncMode::Play, 10.3),
            None,
            &mut player,
            Instant::now(),
        );
        assert!((player.position() - 10.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_pause_does_not_echo() {
        let (mut viewer, mut player, mut events) = watching();
        while events.try_recv().is_ok() {}

        let mut outbound = viewer.on_video_sync(
            SyncState::new(SyncMode::Pause, 5.0),
            None,
            &mut player,
            Instant::now(),
        );
        // The element reports the pause and seek the sync caused
        while let Ok(event) = events.try_recv() {
            outbound.extend(viewer.on_local_media_event(event, Instant::now()));
        }
        assert_eq!(statuses(&outbound), vec![ViewerStatus::Paused]);
        assert!(!viewer.is_locally_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_pause_survives_host_play() {
        let (mut viewer, mut player, _events) = watching();
        tokio::time::advance(Duration::from_secs(1)).await;

        player.pause();
        let out = viewer.on_local_media_event(MediaEvent::Paused, Instant::now());
        assert_eq!(statuses(&out), vec![ViewerStatus::Paused]);
        assert!(viewer.is_locally_paused());

        let out = viewer.on_video_sync(
            SyncState::new(SyncMode::Play, 30.0),
            None,
            &mut player,
            Instant::now(),
        );
        assert!(out.is_empty());
        assert!(player.is_paused());
        assert_eq!(viewer.phase(), ViewerPhase::Synced(WatchStatus::Paused));

        // Resuming locally rejoins the host
        tokio::time::advance(Duration::from_secs(1)).await;
        player.play().unwrap();
        let out = viewer.on_local_media_event(MediaEvent::Played, Instant::now());
        assert_eq!(statuses(&out), vec![ViewerStatus::Live]);
        assert!(!viewer.is_locally_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_pause_right_after_sync_is_reported() {
        let (mut viewer, mut player, mut events) = watching();
        while events.try_recv().is_ok() {}

        viewer.on_video_sync(
            SyncState::new(SyncMode::Pause, 50.0),
            None,
            &mut player,
            Instant::now(),
        );
        let echoed = drain(&mut viewer, &mut events);
        assert!(echoed.is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        viewer.on_video_sync(
            SyncState::new(SyncMode::Play, 60.0),
            None,
            &mut player,
            Instant::now(),
        );
        assert!(!player.is_paused());

        // The user pauses well inside the echo window of the resume.
        tokio::time::advance(Duration::from_millis(100)).await;
        player.pause();
        let outbound = drain(&mut viewer, &mut events);
        assert_eq!(statuses(&outbound), vec![ViewerStatus::Paused]);
        assert!(viewer.is_locally_paused());

        tokio::time::advance(Duration::from_secs(2)).await;
        viewer.on_video_sync(
            SyncState::new(SyncMode::Play, 70.0),
            None,
            &mut player,
            Instant::now(),
        );
        assert!(player.is_paused());
        assert_eq!(viewer.phase(), ViewerPhase::Synced(WatchStatus::Paused));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_and_duplicate_syncs() {
        let (mut viewer, mut player, _events) = watching();
        let older = SyncState::new(SyncMode::Play, 100.0);
        tokio::time::advance(Duration::from_millis(1)).await;
        let mut newer = older.clone();
        newer.pause(50.0);

        let out = viewer.on_video_sync(newer.clone(), None, &mut player, Instant::now());
        assert_eq!(statuses(&out), vec![ViewerStatus::Paused]);

        assert!(viewer
            .on_video_sync(older, None, &mut player, Instant::now())
            .is_empty());
        assert!(player.is_paused());
        assert_eq!(viewer.host_state(), Some(&newer));

        let mut duplicate = newer.clone();
        duplicate.pause(50.0);
        assert!(viewer
            .on_video_sync(duplicate, None, &mut player, Instant::now())
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_for_another_viewer_is_ignored() {
        let (mut viewer, mut player, _events) = watching();
        let out = viewer.on_video_sync(
            SyncState::new(SyncMode::Pause, 70.0),
            Some(&ParticipantId::from("viewer2")),
            &mut player,
            Instant::now(),
        );
        assert!(out.is_empty());
        assert!(viewer.host_state().is_none());
        assert!(!player.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_stopped_ends_viewing() {
        let (mut viewer, mut player, _events) = watching();
        viewer.on_broadcast_stopped(&mut player);

        assert_eq!(viewer.phase(), ViewerPhase::Ended);
        assert!(!player.has_source());
        assert!(viewer.link().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_allows_new_link() {
        let (mut viewer, mut player, _events) = watching();
        assert!(!viewer.accept_call(LinkId::from("link2")));

        viewer.on_broadcast_stopped(&mut player);
        assert!(viewer.on_forced_refresh(&mut player));
        assert_eq!(viewer.phase(), ViewerPhase::AwaitingLink);
        assert!(viewer.accept_call(LinkId::from("link2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_keeps_live_link() {
        let (mut player, _events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let mut viewer = viewer();
        assert!(viewer.accept_call(LinkId::from("link1")));

        // Refresh racing the new host's call: the fresh link stays.
        assert!(!viewer.on_forced_refresh(&mut player));
        assert_eq!(viewer.phase(), ViewerPhase::LinkEstablished);
        assert_eq!(viewer.link(), Some(&LinkId::from("link1")));

        viewer.on_stream(&mut player, MediaStream::new(30));
        assert!(!viewer.on_forced_refresh(&mut player));
        assert!(player.has_source());
        assert_eq!(viewer.phase(), ViewerPhase::ReadyGesturePending);

        viewer.on_gesture(&mut player, Instant::now());
        assert!(!viewer.on_forced_refresh(&mut player));
        assert!(player.has_source());
        assert_eq!(viewer.phase(), ViewerPhase::Synced(WatchStatus::Watching));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_is_terminal_and_idempotent() {
        let (mut viewer, mut player, _events) = watching();

        assert!(viewer.on_kicked(&mut player));
        assert!(!viewer.on_kicked(&mut player));
        assert_eq!(viewer.phase(), ViewerPhase::Kicked);
        assert!(!player.has_source());

        assert!(!viewer.accept_call(LinkId::from("link2")));
        assert!(!viewer.on_forced_refresh(&mut player));
        assert!(viewer
            .on_video_sync(
                SyncState::new(SyncMode::Play, 1.0),
                None,
                &mut player,
                Instant::now()
            )
            .is_empty());
    }

    /// A pipeline whose user activation never sticks.
    struct GestureIgnored(SimulatedPlayer);

    impl MediaPlayer for GestureIgnored {
        fn load(&mut self, source: MediaSource) {
            self.0.load(source);
        }
        fn attach_stream(&mut self, stream: MediaStream) {
            self.0.attach_stream(stream);
        }
        fn clear_source(&mut self) {
            self.0.clear_source();
        }
        fn has_source(&self) -> bool {
            self.0.has_source()
        }
        fn play(&mut self) -> Result<()> {
            self.0.play()
        }
        fn pause(&mut self) {
            self.0.pause();
        }
        fn seek(&mut self, position_seconds: f64) {
            self.0.seek(position_seconds);
        }
        fn position(&self) -> f64 {
            self.0.position()
        }
        fn is_paused(&self) -> bool {
            self.0.is_paused()
        }
        fn set_muted(&mut self, muted: bool) {
            self.0.set_muted(muted);
        }
        fn is_muted(&self) -> bool {
            self.0.is_muted()
        }
        fn capture_stream(&mut self, frame_rate: u32) -> Result<MediaStream> {
            self.0.capture_stream(frame_rate)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_rejection_falls_back_to_muted() {
        let (inner, _events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        let mut player = GestureIgnored(inner);
        let mut viewer = viewer();
        viewer.accept_call(LinkId::from("link1"));
        viewer.on_stream(&mut player, MediaStream::new(30));
        viewer.on_video_sync(
            SyncState::new(SyncMode::Pause, 3.0),
            None,
            &mut player,
            Instant::now(),
        );

        let out = viewer.on_gesture(&mut player, Instant::now());
        assert_eq!(statuses(&out), vec![ViewerStatus::Paused]);

        let out = viewer.on_video_sync(
            SyncState::new(SyncMode::Play, 3.0),
            None,
            &mut player,
            Instant::now(),
        );
        assert!(out.is_empty());
        assert_eq!(viewer.phase(), ViewerPhase::ReadyGesturePending);
        assert!(player.is_muted());
        assert!(!player.is_paused());
    }
}
