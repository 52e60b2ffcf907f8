use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{MessageId, RoomId};

/// Immutable once created; ordering is receipt order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(room_id: RoomId, author: String, text: String) -> Self {
        Self {
            id: MessageId::new(),
            room_id,
            author,
            text,
            sent_at: Utc::now(),
        }
    }
}
