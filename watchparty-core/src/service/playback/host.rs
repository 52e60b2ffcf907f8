//! Host side: `IDLE → MEDIA_LOADED → BROADCASTING{LIVE, PAUSED}`

use tracing::{debug, info};

use crate::{
    media::{MediaEvent, MediaPlayer, MediaSource, MediaStream},
    models::{ParticipantId, RoomId, SyncMode, SyncState},
    signaling::SignalEvent,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    Live,
    Paused,
}

impl From<SyncMode> for BroadcastStatus {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Play => Self::Live,
            SyncMode::Pause => Self::Paused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Idle,
    MediaLoaded,
    Broadcasting(BroadcastStatus),
}

#[derive(Debug)]
pub struct HostSync {
    room_id: RoomId,
    display_name: String,
    frame_rate: u32,
    phase: HostPhase,
    state: Option<SyncState>,
    capture: Option<MediaStream>,
}

impl HostSync {
    #[must_use]
    pub const fn new(room_id: RoomId, display_name: String, frame_rate: u32) -> Self {
        Self {
            room_id,
            display_name,
            frame_rate,
            phase: HostPhase::Idle,
            state: None,
            capture: None,
        }
    }

    /// Load a local file. Not allowed mid-broadcast.
    pub fn load_media(&mut self, player: &mut dyn MediaPlayer, source: MediaSource) -> Result<()> {
        if self.is_broadcasting() {
            return Err(Error::InvalidState(
                "Stop the broadcast before loading another file".to_string(),
            ));
        }
        info!(room_id = %self.room_id, media = %source.name, "Media loaded");
        player.load(source);
        self.phase = HostPhase::MediaLoaded;
        Ok(())
    }

    /// Capture the element's output and publish the initial authoritative
    /// state. A capture failure leaves the host in `MEDIA_LOADED` and
    /// publishes nothing.
    pub fn start_broadcast(
        &mut self,
        player: &mut dyn MediaPlayer,
    ) -> Result<(MediaStream, Vec<SignalEvent>)> {
        match self.phase {
            HostPhase::Idle => {
                return Err(Error::InvalidState("No media loaded".to_string()));
            }
            HostPhase::Broadcasting(_) => {
                return Err(Error::InvalidState("Already broadcasting".to_string()));
            }
            HostPhase::MediaLoaded => {}
        }

        player.set_muted(false);
        let stream = player.capture_stream(self.frame_rate)?;

        let state = SyncState::new(SyncMode::from_paused(player.is_paused()), player.position());
        self.phase = HostPhase::Broadcasting(state.mode.into());
        info!(
            room_id = %self.room_id,
            mode = state.mode.as_str(),
            position = state.position_seconds,
            "Broadcast started"
        );

        let events = vec![
            SignalEvent::HostStartedStream {
                room_id: self.room_id.clone(),
                display_name: self.display_name.clone(),
            },
            self.sync_event(&state, None),
        ];
        self.state = Some(state);
        self.capture = Some(stream.clone());
        Ok((stream, events))
    }

    /// Release the capture, rewind, and announce the end. No-op when not
    /// broadcasting.
    pub fn stop_broadcast(&mut self, player: &mut dyn MediaPlayer) -> Vec<SignalEvent> {
        if !self.is_broadcasting() {
            return Vec::new();
        }

        if let Some(stream) = self.capture.take() {
            stream.stop();
        }
        self.state = None;
        // Flip the phase first so the element's pause/seek events are ignored.
        self.phase = HostPhase::MediaLoaded;
        player.pause();
        player.seek(0.0);
        info!(room_id = %self.room_id, "Broadcast stopped");

        vec![SignalEvent::StopBroadcast {
            room_id: self.room_id.clone(),
        }]
    }

    /// Publish local play/pause/seek transitions while broadcasting.
    pub fn on_media_event(
        &mut self,
        event: MediaEvent,
        player: &dyn MediaPlayer,
    ) -> Option<SignalEvent> {
        let HostPhase::Broadcasting(_) = self.phase else {
            return None;
        };
        let state = self.state.as_mut()?;

        match event {
            MediaEvent::Played => state.play(player.position()),
            MediaEvent::Paused | MediaEvent::Ended => state.pause(player.position()),
            MediaEvent::Seeked { position_seconds } => state.seek(position_seconds),
        }
        self.phase = HostPhase::Broadcasting(state.mode.into());
        debug!(
            room_id = %self.room_id,
            mode = state.mode.as_str(),
            position = state.position_seconds,
            "Publishing local transition"
        );

        let state = state.clone();
        Some(self.sync_event(&state, None))
    }

    /// Answer a viewer's sync request with the current state, scoped to that
    /// viewer. Ignored unless broadcasting.
    pub fn answer_sync_request(
        &mut self,
        requester: ParticipantId,
        player: &dyn MediaPlayer,
    ) -> Option<SignalEvent> {
        if !self.is_broadcasting() {
            debug!(requester = %requester, "Sync requested while not broadcasting");
            return None;
        }
        let state = self.state.as_mut()?;
        // Refresh the position so the reply reflects where playback is now.
        if player.is_paused() {
            state.pause(player.position());
        } else {
            state.play(player.position());
        }
        let state = state.clone();
        Some(self.sync_event(&state, Some(requester)))
    }

    fn sync_event(&self, state: &SyncState, target_id: Option<ParticipantId>) -> SignalEvent {
        SignalEvent::VideoSync {
            room_id: self.room_id.clone(),
            mode: state.mode,
            position_seconds: state.position_seconds,
            origin_timestamp: state.origin_timestamp,
            target_id,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> HostPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_broadcasting(&self) -> bool {
        matches!(self.phase, HostPhase::Broadcasting(_))
    }

    #[must_use]
    pub const fn state(&self) -> Option<&SyncState> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}
