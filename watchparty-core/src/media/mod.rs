//! Local media pipeline abstraction
//!
//! Mirrors the subset of a media element the protocol drives: source
//! management, play/pause/seek, mute, and capture of an outgoing stream.
//! Lifecycle events are delivered asynchronously, like element events.

pub mod simulated;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::generate_id;
use crate::Result;

pub use simulated::{AutoplayPolicy, SimulatedPlayer};

/// A locally loaded media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub name: String,
    pub duration_seconds: Option<f64>,
}

impl MediaSource {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration_seconds: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_seconds: f64) -> Self {
        self.duration_seconds = Some(duration_seconds);
        self
    }
}

/// A captured audio+video stream. Clones share the same liveness flag.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    frame_rate: u32,
    live: Arc<AtomicBool>,
}

impl MediaStream {
    #[must_use]
    pub fn new(frame_rate: u32) -> Self {
        Self {
            id: generate_id(),
            frame_rate,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop all tracks. Idempotent.
    pub fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Lifecycle events fired by the local media pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    Played,
    Paused,
    Seeked { position_seconds: f64 },
    Ended,
}

pub trait MediaPlayer: Send {
    fn load(&mut self, source: MediaSource);

    /// Use a remote stream as the source.
    fn attach_stream(&mut self, stream: MediaStream);

    fn clear_source(&mut self);

    fn has_source(&self) -> bool;

    /// Start playback. Fails with [`crate::Error::Autoplay`] when the autoplay
    /// policy rejects it.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn seek(&mut self, position_seconds: f64);

    fn position(&self) -> f64;

    fn is_paused(&self) -> bool;

    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;

    /// Capture the element's output. Fails with [`crate::Error::Capability`]
    /// when the pipeline cannot produce a stream.
    fn capture_stream(&mut self, frame_rate: u32) -> Result<MediaStream>;

    /// Record that the user interacted with the page, lifting autoplay limits.
    fn grant_user_activation(&mut self) {}
}
