use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The local media pipeline cannot produce a capturable stream.
    #[error("Capability error: {0}")]
    Capability(String),

    /// `play()` was rejected by the autoplay policy.
    #[error("Autoplay rejected: {0}")]
    Autoplay(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Signaling error: {0}")]
    Signaling(String),
}

impl Error {
    /// Link and transport failures are retried by the announce/dial cycle and
    /// never reach the user.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Link(_) | Self::Signaling(_))
    }

    /// Only failures that stop a requested action from starting are shown.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::Capability(_) | Self::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
