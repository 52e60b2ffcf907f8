//! Error types for the in-process hub

use thiserror::Error;

use watchparty_core::models::RoomId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Connection {0} has not joined a room")]
    NotJoined(String),

    #[error("Only the host of room {0} may do this")]
    NotHost(RoomId),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Core(#[from] watchparty_core::Error),
}

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for watchparty_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Core(inner) => inner,
            other => Self::Signaling(other.to_string()),
        }
    }
}
