//! Room membership tracking
//!
//! The relay side owns the authoritative roster through
//! [`RoomMembershipManager`]; every client keeps a read-only [`RosterView`]
//! fed by `update-user-list` snapshots.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    models::{LinkId, Participant, ParticipantId, Room, RoomId, ViewerStatus},
    Error, Result,
};

/// Roster after a mutation, to be sent to every current participant
#[derive(Debug, Clone, PartialEq)]
pub struct RosterSnapshot {
    pub room_id: RoomId,
    pub participants: Vec<Participant>,
    /// Set when the mutation added a participant that was not present
    pub newly_joined: Option<ParticipantId>,
}

#[derive(Clone)]
pub struct RoomMembershipManager {
    rooms: Arc<DashMap<RoomId, Room>>,
    max_participants: usize,
}

impl RoomMembershipManager {
    #[must_use]
    pub fn new(max_participants: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            max_participants,
        }
    }

    /// Register or refresh a participant. Re-joining is idempotent.
    pub fn join(
        &self,
        room_id: &RoomId,
        participant_id: ParticipantId,
        display_name: String,
    ) -> Result<RosterSnapshot> {
        let mut room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone()));

        if !room.contains(&participant_id) && room.len() >= self.max_participants {
            return Err(Error::InvalidInput(format!(
                "Room {room_id} is full ({} participants)",
                self.max_participants
            )));
        }

        let added = room.upsert(participant_id.clone(), display_name);
        if added {
            info!(room_id = %room_id, participant_id = %participant_id, "Participant joined");
        } else {
            debug!(room_id = %room_id, participant_id = %participant_id, "Participant refreshed");
        }

        Ok(RosterSnapshot {
            room_id: room_id.clone(),
            participants: room.snapshot(),
            newly_joined: added.then_some(participant_id),
        })
    }

    /// Register the room's host, replacing any previous one.
    pub fn join_as_host(
        &self,
        room_id: &RoomId,
        participant_id: ParticipantId,
        display_name: String,
    ) -> Result<RosterSnapshot> {
        let mut room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone()));

        if !room.contains(&participant_id) && room.len() >= self.max_participants {
            return Err(Error::InvalidInput(format!("Room {room_id} is full")));
        }

        let added = !room.contains(&participant_id);
        room.set_host(participant_id.clone(), display_name);
        info!(room_id = %room_id, participant_id = %participant_id, "Host registered");

        Ok(RosterSnapshot {
            room_id: room_id.clone(),
            participants: room.snapshot(),
            newly_joined: added.then_some(participant_id),
        })
    }

    /// Remove a participant. `None` if it was not in the room.
    pub fn leave(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
    ) -> Option<RosterSnapshot> {
        let mut room = self.rooms.get_mut(room_id)?;
        room.remove(participant_id)?;
        info!(room_id = %room_id, participant_id = %participant_id, "Participant left");

        Some(RosterSnapshot {
            room_id: room_id.clone(),
            participants: room.snapshot(),
            newly_joined: None,
        })
    }

    /// Forced removal. Kicking someone who is already gone is a no-op and
    /// returns `None`.
    pub fn kick(&self, room_id: &RoomId, participant_id: &ParticipantId) -> Option<RosterSnapshot> {
        let snapshot = self.leave(room_id, participant_id);
        if snapshot.is_some() {
            info!(room_id = %room_id, participant_id = %participant_id, "Participant kicked");
        } else {
            debug!(
                room_id = %room_id,
                participant_id = %participant_id,
                "Kick target already gone"
            );
        }
        snapshot
    }

    /// Record a viewer's reported status. `None` when nothing changed.
    pub fn update_status(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        status: ViewerStatus,
    ) -> Option<RosterSnapshot> {
        let mut room = self.rooms.get_mut(room_id)?;
        if !room.set_status(participant_id, status) {
            return None;
        }
        debug!(
            room_id = %room_id,
            participant_id = %participant_id,
            status = %status,
            "Viewer status changed"
        );

        Some(RosterSnapshot {
            room_id: room_id.clone(),
            participants: room.snapshot(),
            newly_joined: None,
        })
    }

    #[must_use]
    pub fn roster(&self, room_id: &RoomId) -> Vec<Participant> {
        self.rooms
            .get(room_id)
            .map(|room| room.snapshot())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn host_of(&self, room_id: &RoomId) -> Option<Participant> {
        self.rooms
            .get(room_id)
            .and_then(|room| room.host_participant().cloned())
    }

    #[must_use]
    pub fn is_host(&self, room_id: &RoomId, participant_id: &ParticipantId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.is_host(participant_id))
    }

    /// Drop rooms nobody is in any more. Returns how many were removed.
    pub fn prune_empty_rooms(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, room| !room.is_empty());
        before - self.rooms.len()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl std::fmt::Debug for RoomMembershipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomMembershipManager")
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

/// A client's read-only projection of its room's roster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterView {
    participants: Vec<Participant>,
}

impl RosterView {
    /// Replace the projection with the relay's latest snapshot.
    pub fn apply(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    /// Everyone except `local_id` and the host
    #[must_use]
    pub fn viewers(&self, local_id: &ParticipantId) -> Vec<Participant> {
        self.participants
            .iter()
            .filter(|p| !p.is_host && p.id != *local_id)
            .cloned()
            .collect()
    }

    /// Annotate viewers with the local link to them, if any.
    #[must_use]
    pub fn viewers_with_links(
        &self,
        local_id: &ParticipantId,
        link_for: impl Fn(&ParticipantId) -> Option<LinkId>,
    ) -> Vec<Participant> {
        self.viewers(local_id)
            .into_iter()
            .map(|mut p| {
                p.link_id = link_for(&p.id);
                p
            })
            .collect()
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn host(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_host)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == *id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
