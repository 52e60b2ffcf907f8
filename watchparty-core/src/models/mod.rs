pub mod chat;
pub mod id;
pub mod participant;
pub mod playback;
pub mod room;

pub use chat::ChatMessage;
pub use id::{generate_id, LinkId, MessageId, ParticipantId, RoomId};
pub use participant::{Participant, ViewerStatus};
pub use playback::{SyncMode, SyncState};
pub use room::Room;
