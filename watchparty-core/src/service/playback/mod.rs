//! Playback synchronization protocol
//!
//! The host owns the authoritative [`SyncState`](crate::models::SyncState)
//! and publishes every local play/pause/seek as `video-sync`. Viewers cache
//! the latest state and reconcile their local element against it once the
//! user has satisfied the autoplay gesture.

pub mod host;
pub mod viewer;

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

use crate::models::SyncMode;

pub use host::{BroadcastStatus, HostPhase, HostSync};
pub use viewer::{ViewerPhase, ViewerSync, WatchStatus};

/// Records the play/pause mutations a remote sync applied to the local
/// element so its own observers do not report them back. Only an observed
/// event matching a pending expectation is absorbed, and each expectation
/// lapses after the window.
#[derive(Debug, Clone)]
pub struct EchoGuard {
    window: Duration,
    pending: VecDeque<(SyncMode, Instant)>,
}

impl EchoGuard {
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            pending: VecDeque::new(),
        }
    }

    /// Expect the element to report `mode` shortly after `now`.
    pub fn expect(&mut self, mode: SyncMode, now: Instant) {
        self.pending.push_back((mode, now + self.window));
    }

    /// Whether an observed `mode` change at `now` was remote-caused.
    /// Consumes the matching expectation.
    pub fn absorbs(&mut self, mode: SyncMode, now: Instant) -> bool {
        self.pending.retain(|(_, until)| now < *until);
        match self.pending.iter().position(|(pending, _)| *pending == mode) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
