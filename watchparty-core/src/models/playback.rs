use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMode {
    Play,
    Pause,
}

impl SyncMode {
    #[must_use]
    pub const fn from_paused(paused: bool) -> Self {
        if paused {
            Self::Pause
        } else {
            Self::Play
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
        }
    }
}

/// Authoritative playback state of a room. Only the host mutates it; viewers
/// keep a cached copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub mode: SyncMode,
    pub position_seconds: f64,
    pub origin_timestamp: DateTime<Utc>,
}

impl SyncState {
    #[must_use]
    pub fn new(mode: SyncMode, position_seconds: f64) -> Self {
        Self {
            mode,
            position_seconds,
            origin_timestamp: Utc::now(),
        }
    }

    pub fn play(&mut self, position_seconds: f64) {
        self.transition(SyncMode::Play, position_seconds);
    }

    pub fn pause(&mut self, position_seconds: f64) {
        self.transition(SyncMode::Pause, position_seconds);
    }

    pub fn seek(&mut self, position_seconds: f64) {
        self.transition(self.mode, position_seconds);
    }

    fn transition(&mut self, mode: SyncMode, position_seconds: f64) {
        self.mode = mode;
        self.position_seconds = position_seconds;
        // Keep origins strictly increasing so receivers can order states.
        let now = Utc::now();
        self.origin_timestamp = if now > self.origin_timestamp {
            now
        } else {
            self.origin_timestamp + chrono::Duration::microseconds(1)
        };
    }

    /// Last-write-wins: an incoming state replaces this one unless it is older.
    #[must_use]
    pub fn is_superseded_by(&self, other: &Self) -> bool {
        other.origin_timestamp >= self.origin_timestamp
    }

    /// Same mode and position, ignoring origin.
    #[must_use]
    pub fn same_payload(&self, other: &Self) -> bool {
        self.mode == other.mode
            && (self.position_seconds - other.position_seconds).abs() < f64::EPSILON
    }
}
