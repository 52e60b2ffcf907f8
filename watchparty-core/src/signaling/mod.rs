//! Signaling channel contract
//!
//! The relay itself is an external collaborator; this module only defines
//! the events exchanged with it and how they are fanned out locally.

pub mod client;
pub mod dispatch;
pub mod events;

pub use client::SignalingClient;
pub use dispatch::{EventDispatcher, EventReceiver};
pub use events::{EventKind, SignalEvent};
