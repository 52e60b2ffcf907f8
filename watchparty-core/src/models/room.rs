use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::id::{ParticipantId, RoomId};
use super::participant::{Participant, ViewerStatus};

/// One room's roster. At most one participant is the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub host: Option<ParticipantId>,
    pub participants: HashMap<ParticipantId, Participant>,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            host: None,
            participants: HashMap::new(),
        }
    }

    /// Register or refresh a participant. Returns `true` if it was not present.
    pub fn upsert(&mut self, id: ParticipantId, display_name: String) -> bool {
        let is_host = self.host.as_ref() == Some(&id);
        match self.participants.get_mut(&id) {
            Some(existing) => {
                existing.display_name = display_name;
                existing.is_host = is_host;
                false
            }
            None => {
                let mut participant = Participant::new(id.clone(), display_name);
                participant.is_host = is_host;
                self.participants.insert(id, participant);
                true
            }
        }
    }

    /// Promote a participant to host, demoting any previous host.
    pub fn set_host(&mut self, id: ParticipantId, display_name: String) {
        if let Some(previous) = self.host.take() {
            if let Some(p) = self.participants.get_mut(&previous) {
                p.is_host = false;
            }
        }
        self.host = Some(id.clone());
        self.upsert(id, display_name);
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        if self.host.as_ref() == Some(id) {
            self.host = None;
        }
        self.participants.remove(id)
    }

    pub fn set_status(&mut self, id: &ParticipantId, status: ViewerStatus) -> bool {
        match self.participants.get_mut(id) {
            Some(p) if p.status != status => {
                p.status = status;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_host(&self, id: &ParticipantId) -> bool {
        self.host.as_ref() == Some(id)
    }

    #[must_use]
    pub fn host_participant(&self) -> Option<&Participant> {
        self.host.as_ref().and_then(|id| self.participants.get(id))
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// A room with nobody left is eligible for external cleanup.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Roster ordered by id so snapshots compare stably.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut roster: Vec<Participant> = self.participants.values().cloned().collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        roster
    }
}
