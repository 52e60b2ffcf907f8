pub mod chat;
pub mod membership;
pub mod peer_link;
pub mod playback;

pub use chat::{ChatEntry, ChatRelay};
pub use membership::{RoomMembershipManager, RosterSnapshot, RosterView};
pub use peer_link::{
    AnnounceTimer, CallAnswer, DialOutcome, IncomingCall, MediaLink, PeerConnector,
    PeerLinkManager, PeerSession, PeerTransport,
};
pub use playback::{
    BroadcastStatus, EchoGuard, HostPhase, HostSync, ViewerPhase, ViewerSync, WatchStatus,
};
