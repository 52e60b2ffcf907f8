//! Fire-and-forget room chat over the signaling channel
//!
//! Sent messages are echoed into the local log immediately; inbound copies of
//! our own messages are dropped.

use std::collections::VecDeque;

use tracing::debug;

use crate::{
    models::{ChatMessage, MessageId, RoomId},
    signaling::SignalEvent,
    Error, Result,
};

const DEFAULT_AUTHOR: &str = "Guest";

/// Own message ids remembered for echo suppression. The relay does not echo
/// to the sender, so older ids are evicted rather than waited on.
const MAX_PENDING_ECHOES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub message: ChatMessage,
    pub is_local: bool,
}

#[derive(Debug, Clone)]
pub struct ChatRelay {
    room_id: RoomId,
    author: String,
    max_length: usize,
    entries: Vec<ChatEntry>,
    sent: VecDeque<MessageId>,
}

impl ChatRelay {
    #[must_use]
    pub fn new(room_id: RoomId, author: &str, max_length: usize) -> Self {
        let author = author.trim();
        Self {
            room_id,
            author: if author.is_empty() {
                DEFAULT_AUTHOR.to_string()
            } else {
                author.to_string()
            },
            max_length,
            entries: Vec::new(),
            sent: VecDeque::new(),
        }
    }

    /// Build the outbound event and append the message locally.
    pub fn send(&mut self, text: &str) -> Result<SignalEvent> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("Message cannot be empty".to_string()));
        }
        if text.chars().count() > self.max_length {
            return Err(Error::InvalidInput(format!(
                "Message must be at most {} characters",
                self.max_length
            )));
        }

        let message = ChatMessage::new(self.room_id.clone(), self.author.clone(), text.to_string());
        if self.sent.len() == MAX_PENDING_ECHOES {
            self.sent.pop_front();
        }
        self.sent.push_back(message.id.clone());
        self.entries.push(ChatEntry {
            message: message.clone(),
            is_local: true,
        });

        Ok(SignalEvent::SendMessage { message })
    }

    /// Append an inbound message unless it is one we sent. Returns whether it
    /// was appended.
    pub fn on_receive(&mut self, message: ChatMessage) -> bool {
        if message.room_id != self.room_id {
            debug!(room_id = %message.room_id, "Dropping chat message for another room");
            return false;
        }
        if let Some(index) = self.sent.iter().position(|id| *id == message.id) {
            self.sent.remove(index);
            return false;
        }
        self.entries.push(ChatEntry {
            message,
            is_local: false,
        });
        true
    }

    #[must_use]
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }
}
