use serde::{Deserialize, Serialize};

use super::id::{LinkId, ParticipantId};

/// Playback status a viewer reports back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViewerStatus {
    Live,
    Paused,
}

impl ViewerStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Paused => "PAUSED",
        }
    }
}

impl std::fmt::Display for ViewerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub status: ViewerStatus,
    /// Set once a host→viewer media link is up
    pub link_id: Option<LinkId>,
    pub is_host: bool,
}

impl Participant {
    #[must_use]
    pub const fn new(id: ParticipantId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            status: ViewerStatus::Live,
            link_id: None,
            is_host: false,
        }
    }

    #[must_use]
    pub fn host(id: ParticipantId, display_name: String) -> Self {
        Self {
            is_host: true,
            ..Self::new(id, display_name)
        }
    }
}
