//! Clock-driven stand-in for a browser media element
//!
//! Position advances on the tokio clock while playing, so tests running with
//! a paused runtime control it exactly.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{MediaEvent, MediaPlayer, MediaSource, MediaStream};
use crate::{Error, Result};

/// Which `play()` calls succeed before the user has interacted with the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayPolicy {
    /// Everything plays
    Allow,
    /// Muted playback is allowed, audible playback needs a gesture
    #[default]
    MutedOnly,
    /// Nothing plays without a gesture
    Blocked,
}

#[derive(Debug, Clone)]
enum Source {
    File(MediaSource),
    Stream(MediaStream),
}

#[derive(Debug)]
struct PlayerState {
    source: Option<Source>,
    paused: bool,
    muted: bool,
    anchor_position: f64,
    anchor_at: Instant,
    user_activated: bool,
    autoplay: AutoplayPolicy,
    capture_supported: bool,
}

impl PlayerState {
    fn position(&self) -> f64 {
        let position = if self.paused {
            self.anchor_position
        } else {
            self.anchor_position + self.anchor_at.elapsed().as_secs_f64()
        };
        match &self.source {
            Some(Source::File(MediaSource {
                duration_seconds: Some(duration),
                ..
            })) => position.min(*duration),
            _ => position,
        }
    }

    fn rebase(&mut self, position: f64) {
        self.anchor_position = position;
        self.anchor_at = Instant::now();
    }

    fn reset(&mut self) {
        self.paused = true;
        self.rebase(0.0);
    }
}

/// Cheap to clone; clones observe and drive the same element.
#[derive(Clone)]
pub struct SimulatedPlayer {
    state: Arc<Mutex<PlayerState>>,
    events: mpsc::UnboundedSender<MediaEvent>,
}

impl SimulatedPlayer {
    #[must_use]
    pub fn new(autoplay: AutoplayPolicy) -> (Self, mpsc::UnboundedReceiver<MediaEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let player = Self {
            state: Arc::new(Mutex::new(PlayerState {
                source: None,
                paused: true,
                muted: false,
                anchor_position: 0.0,
                anchor_at: Instant::now(),
                user_activated: false,
                autoplay,
                capture_supported: true,
            })),
            events,
        };
        (player, rx)
    }

    /// Simulate a pipeline without `captureStream` support.
    #[must_use]
    pub fn without_capture(self) -> Self {
        self.state.lock().capture_supported = false;
        self
    }

    /// Play to the end: pauses at the end position and fires `Ended`.
    pub fn finish(&self) {
        let fire_pause = {
            let mut state = self.state.lock();
            let end = state.position();
            let was_playing = !state.paused;
            state.paused = true;
            state.rebase(end);
            was_playing
        };
        if fire_pause {
            self.fire(MediaEvent::Paused);
        }
        self.fire(MediaEvent::Ended);
    }

    #[must_use]
    pub fn attached_stream(&self) -> Option<MediaStream> {
        match &self.state.lock().source {
            Some(Source::Stream(stream)) => Some(stream.clone()),
            _ => None,
        }
    }

    fn fire(&self, event: MediaEvent) {
        // Nobody listening is fine: the element keeps working.
        let _ = self.events.send(event);
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn load(&mut self, source: MediaSource) {
        let mut state = self.state.lock();
        state.source = Some(Source::File(source));
        state.reset();
    }

    fn attach_stream(&mut self, stream: MediaStream) {
        let mut state = self.state.lock();
        state.source = Some(Source::Stream(stream));
        state.reset();
    }

    fn clear_source(&mut self) {
        let mut state = self.state.lock();
        state.source = None;
        state.reset();
    }

    fn has_source(&self) -> bool {
        self.state.lock().source.is_some()
    }

    fn play(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.source.is_none() {
                return Err(Error::InvalidState("no media source".to_string()));
            }
            if !state.paused {
                return Ok(());
            }
            let allowed = state.user_activated
                || match state.autoplay {
                    AutoplayPolicy::Allow => true,
                    AutoplayPolicy::MutedOnly => state.muted,
                    AutoplayPolicy::Blocked => false,
                };
            if !allowed {
                return Err(Error::Autoplay(
                    "play() requires a user gesture".to_string(),
                ));
            }
            let position = state.position();
            state.paused = false;
            state.rebase(position);
        }
        self.fire(MediaEvent::Played);
        Ok(())
    }

    fn pause(&mut self) {
        {
            let mut state = self.state.lock();
            if state.paused {
                return;
            }
            let position = state.position();
            state.paused = true;
            state.rebase(position);
        }
        self.fire(MediaEvent::Paused);
    }

    fn seek(&mut self, position_seconds: f64) {
        let position_seconds = position_seconds.max(0.0);
        self.state.lock().rebase(position_seconds);
        self.fire(MediaEvent::Seeked { position_seconds });
    }

    fn position(&self) -> f64 {
        self.state.lock().position()
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    fn capture_stream(&mut self, frame_rate: u32) -> Result<MediaStream> {
        let state = self.state.lock();
        if !state.capture_supported {
            return Err(Error::Capability(
                "media pipeline cannot capture an output stream".to_string(),
            ));
        }
        match state.source {
            Some(Source::File(_)) => Ok(MediaStream::new(frame_rate)),
            Some(Source::Stream(_)) | None => Err(Error::Capability(
                "no local media loaded to capture".to_string(),
            )),
        }
    }

    fn grant_user_activation(&mut self) {
        self.state.lock().user_activated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_clock() {
        let (mut player, mut events) = SimulatedPlayer::new(AutoplayPolicy::Allow);
        player.load(MediaSource::new("movie.mp4"));
        player.play().unwrap();
        assert_eq!(events.recv().await, Some(MediaEvent::Played));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((player.position() - 5.0).abs() < 1e-6);

        player.pause();
        assert_eq!(events.recv().await, Some(MediaEvent::Paused));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((player.position() - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_play_and_pause_only_fire_on_change() {
        let (mut player, mut events) = SimulatedPlayer::new(AutoplayPolicy::Allow);
        player.load(MediaSource::new("movie.mp4"));

        player.pause();
        player.play().unwrap();
        player.play().unwrap();

        assert_eq!(events.recv().await, Some(MediaEvent::Played));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_autoplay_policy() {
        let (mut player, _events) = SimulatedPlayer::new(AutoplayPolicy::MutedOnly);
        player.attach_stream(MediaStream::new(30));

        assert!(matches!(player.play(), Err(Error::Autoplay(_))));

        player.set_muted(true);
        assert!(player.play().is_ok());
        player.pause();

        player.set_muted(false);
        player.grant_user_activation();
        assert!(player.play().is_ok());
    }

    #[tokio::test]
    async fn test_capture_requires_support_and_file() {
        let (mut player, _events) = SimulatedPlayer::new(AutoplayPolicy::Allow);
        assert!(matches!(player.capture_stream(30), Err(Error::Capability(_))));

        player.load(MediaSource::new("movie.mp4"));
        assert_eq!(player.capture_stream(30).unwrap().frame_rate(), 30);

        let mut unsupported = player.without_capture();
        assert!(matches!(unsupported.capture_stream(30), Err(Error::Capability(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_clamps_to_duration() {
        let (mut player, mut events) = SimulatedPlayer::new(AutoplayPolicy::Allow);
        player.load(MediaSource::new("short.mp4").with_duration(3.0));
        player.play().unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        player.finish();
        assert!((player.position() - 3.0).abs() < 1e-6);
        assert_eq!(events.recv().await, Some(MediaEvent::Played));
        assert_eq!(events.recv().await, Some(MediaEvent::Paused));
        assert_eq!(events.recv().await, Some(MediaEvent::Ended));
    }
}
