use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Participant, ParticipantId, RoomId, SyncMode, ViewerStatus};
use chrono::{DateTime, Utc};

/// Events exchanged with the rendezvous relay on a room topic.
///
/// Sender identity is not part of the payload; the relay knows which
/// connection published an event and fills in `requester_id`/`participant_id`
/// on the events it forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SignalEvent {
    JoinRoom {
        room_id: RoomId,
        transport_id: ParticipantId,
        display_name: String,
    },

    LeaveRoom,

    /// Host asks the relay to remove a participant
    KickUser {
        room_id: RoomId,
        target_id: ParticipantId,
    },

    /// Delivered to the kicked participant only
    Kicked,

    /// Like `join-room`, names the host's transport id so the relay can key
    /// it in the roster
    HostJoined {
        room_id: RoomId,
        transport_id: ParticipantId,
        display_name: String,
    },

    HostStartedStream {
        room_id: RoomId,
        display_name: String,
    },

    /// Relay → host: a viewer announced itself and can be dialed
    UserConnected {
        participant_id: ParticipantId,
    },

    UpdateUserList {
        participants: Vec<Participant>,
    },

    VideoSync {
        room_id: RoomId,
        mode: SyncMode,
        position_seconds: f64,
        origin_timestamp: DateTime<Utc>,
        /// Scope the sync to a single viewer instead of the whole room
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<ParticipantId>,
    },

    /// Viewer → relay
    RequestSync {
        room_id: RoomId,
    },

    /// Relay → host, on behalf of a viewer's request-sync
    AskSyncData {
        requester_id: ParticipantId,
    },

    ViewerStatusUpdate {
        room_id: RoomId,
        status: ViewerStatus,
    },

    StopBroadcast {
        room_id: RoomId,
    },

    BroadcastStopped {
        room_id: RoomId,
    },

    StreamForcedRefresh {
        room_id: RoomId,
    },

    SendMessage {
        message: ChatMessage,
    },

    ReceiveMessage {
        message: ChatMessage,
    },

    /// Viewer → relay
    AskHostName {
        room_id: RoomId,
    },

    /// Relay → host, on behalf of a viewer's ask-host-name
    HostNameRequested {
        requester_id: ParticipantId,
    },

    /// Host → relay → requester
    ReturnHostName {
        target_id: ParticipantId,
        name: String,
    },
}

/// Discriminant of [`SignalEvent`], used to subscribe by event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JoinRoom,
    LeaveRoom,
    KickUser,
    Kicked,
    HostJoined,
    HostStartedStream,
    UserConnected,
    UpdateUserList,
    VideoSync,
    RequestSync,
    AskSyncData,
    ViewerStatusUpdate,
    StopBroadcast,
    BroadcastStopped,
    StreamForcedRefresh,
    SendMessage,
    ReceiveMessage,
    AskHostName,
    HostNameRequested,
    ReturnHostName,
}

impl SignalEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::JoinRoom { .. } => EventKind::JoinRoom,
            Self::LeaveRoom => EventKind::LeaveRoom,
            Self::KickUser { .. } => EventKind::KickUser,
            Self::Kicked => EventKind::Kicked,
            Self::HostJoined { .. } => EventKind::HostJoined,
            Self::HostStartedStream { .. } => EventKind::HostStartedStream,
            Self::UserConnected { .. } => EventKind::UserConnected,
            Self::UpdateUserList { .. } => EventKind::UpdateUserList,
            Self::VideoSync { .. } => EventKind::VideoSync,
            Self::RequestSync { .. } => EventKind::RequestSync,
            Self::AskSyncData { .. } => EventKind::AskSyncData,
            Self::ViewerStatusUpdate { .. } => EventKind::ViewerStatusUpdate,
            Self::StopBroadcast { .. } => EventKind::StopBroadcast,
            Self::BroadcastStopped { .. } => EventKind::BroadcastStopped,
            Self::StreamForcedRefresh { .. } => EventKind::StreamForcedRefresh,
            Self::SendMessage { .. } => EventKind::SendMessage,
            Self::ReceiveMessage { .. } => EventKind::ReceiveMessage,
            Self::AskHostName { .. } => EventKind::AskHostName,
            Self::HostNameRequested { .. } => EventKind::HostNameRequested,
            Self::ReturnHostName { .. } => EventKind::ReturnHostName,
        }
    }

    /// Get the room ID for events that name one explicitly
    #[must_use]
    pub const fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::JoinRoom { room_id, .. }
            | Self::KickUser { room_id, .. }
            | Self::HostJoined { room_id, .. }
            | Self::HostStartedStream { room_id, .. }
            | Self::VideoSync { room_id, .. }
            | Self::RequestSync { room_id }
            | Self::ViewerStatusUpdate { room_id, .. }
            | Self::StopBroadcast { room_id }
            | Self::BroadcastStopped { room_id }
            | Self::StreamForcedRefresh { room_id }
            | Self::AskHostName { room_id } => Some(room_id),
            Self::SendMessage { message } | Self::ReceiveMessage { message } => {
                Some(&message.room_id)
            }
            Self::LeaveRoom
            | Self::Kicked
            | Self::UserConnected { .. }
            | Self::UpdateUserList { .. }
            | Self::AskSyncData { .. }
            | Self::HostNameRequested { .. }
            | Self::ReturnHostName { .. } => None,
        }
    }

    /// Wire name of the event
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self.kind() {
            EventKind::JoinRoom => "join-room",
            EventKind::LeaveRoom => "leave-room",
            EventKind::KickUser => "kick-user",
            EventKind::Kicked => "kicked",
            EventKind::HostJoined => "host-joined",
            EventKind::HostStartedStream => "host-started-stream",
            EventKind::UserConnected => "user-connected",
            EventKind::UpdateUserList => "update-user-list",
            EventKind::VideoSync => "video-sync",
            EventKind::RequestSync => "request-sync",
            EventKind::AskSyncData => "ask-sync-data",
            EventKind::ViewerStatusUpdate => "viewer-status-update",
            EventKind::StopBroadcast => "stop-broadcast",
            EventKind::BroadcastStopped => "broadcast-stopped",
            EventKind::StreamForcedRefresh => "stream-forced-refresh",
            EventKind::SendMessage => "send-message",
            EventKind::ReceiveMessage => "receive-message",
            EventKind::AskHostName => "ask-host-name",
            EventKind::HostNameRequested => "host-name-requested",
            EventKind::ReturnHostName => "return-host-name",
        }
    }
}
