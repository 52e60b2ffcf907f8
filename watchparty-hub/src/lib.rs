//! In-process rendezvous for watch parties
//!
//! [`RelayHub`] routes signaling events between the participants of a room
//! and owns the authoritative roster. [`LocalPeerNetwork`] carries media links
//! between endpoints in the same process.

pub mod client;
pub mod error;
pub mod hub;
pub mod party;
pub mod peer;

pub use client::HubSignalingClient;
pub use error::{Error, Result};
pub use hub::{ConnectionId, RelayHub};
pub use party::LocalParty;
pub use peer::{LocalConnector, LocalPeerNetwork};
