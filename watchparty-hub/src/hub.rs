use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use watchparty_core::{
    config::RelayConfig,
    models::{Participant, ParticipantId, RoomId},
    service::{RoomMembershipManager, RosterSnapshot},
    signaling::SignalEvent,
};

use crate::error::{Error, Result};

/// Handle for a client connection
pub type ConnectionId = String;

/// Message sender for a client connection
pub type MessageSender = mpsc::UnboundedSender<SignalEvent>;

#[derive(Debug, Clone)]
struct Subscriber {
    connection_id: ConnectionId,
    participant_id: ParticipantId,
}

/// In-memory relay routing signaling events between the participants of a
/// room. Sender identity comes from the connection, never from the payload.
#[derive(Clone)]
pub struct RelayHub {
    /// Every open connection, joined or not
    senders: Arc<DashMap<ConnectionId, MessageSender>>,

    /// Map of `room_id` -> subscribers joined to it
    rooms: Arc<DashMap<RoomId, Vec<Subscriber>>>,

    /// Map of `connection_id` -> (`room_id`, `participant_id`) for cleanup
    connections: Arc<DashMap<ConnectionId, (RoomId, ParticipantId)>>,

    membership: RoomMembershipManager,
    max_chat_length: usize,
}

impl RelayHub {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            senders: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
            membership: RoomMembershipManager::new(config.max_participants_per_room),
            max_chat_length: config.max_chat_length,
        }
    }

    /// Open a connection. Events routed to it arrive on the receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<SignalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = nanoid::nanoid!(12);
        self.senders.insert(connection_id.clone(), tx);
        debug!(connection_id = %connection_id, "Client connected");
        (connection_id, rx)
    }

    /// Close a connection, leaving its room if it joined one.
    pub fn disconnect(&self, connection_id: &str) {
        self.leave(connection_id);
        if self.senders.remove(connection_id).is_some() {
            debug!(connection_id = %connection_id, "Client disconnected");
        }
    }

    /// Route an event published by `connection_id`. Returns how many
    /// deliveries were made.
    pub fn publish(&self, connection_id: &str, event: SignalEvent) -> Result<usize> {
        if !self.senders.contains_key(connection_id) {
            return Err(Error::UnknownConnection(connection_id.to_string()));
        }
        debug!(
            connection_id = %connection_id,
            event_type = event.event_type(),
            "Routing event"
        );

        match event {
            SignalEvent::JoinRoom {
                room_id,
                transport_id,
                display_name,
            } => {
                let snapshot = self
                    .membership
                    .join(&room_id, transport_id.clone(), display_name)?;
                self.bind(connection_id, &room_id, &transport_id);
                let mut delivered = self.send_roster(&snapshot);

                // Every announcement is a chance for the host to (re)dial.
                if let Some(host) = self.membership.host_of(&room_id) {
                    if host.id != transport_id {
                        delivered += self.send_to_participant(
                            &room_id,
                            &host.id,
                            SignalEvent::UserConnected {
                                participant_id: transport_id,
                            },
                        );
                    }
                }
                return Ok(delivered);
            }
            SignalEvent::HostJoined {
                room_id,
                transport_id,
                display_name,
            } => {
                let snapshot = self
                    .membership
                    .join_as_host(&room_id, transport_id.clone(), display_name)?;
                self.bind(connection_id, &room_id, &transport_id);
                return Ok(self.send_roster(&snapshot));
            }
            SignalEvent::LeaveRoom => {
                // Leaving twice, or after a kick, is fine.
                return Ok(self.leave(connection_id));
            }
            _ => {}
        }

        let (room_id, sender) = self
            .connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotJoined(connection_id.to_string()))?;
        if let Some(named) = event.room_id() {
            if *named != room_id {
                return Err(Error::InvalidEvent(format!(
                    "{} names room {named} but the sender is in {room_id}",
                    event.event_type()
                )));
            }
        }

        match &event {
            SignalEvent::HostStartedStream { .. } => {
                self.require_host(&room_id, &sender)?;
                Ok(self.broadcast(
                    &room_id,
                    &SignalEvent::StreamForcedRefresh {
                        room_id: room_id.clone(),
                    },
                    Some(&sender),
                ))
            }
            SignalEvent::VideoSync { target_id, .. } => {
                self.require_host(&room_id, &sender)?;
                match target_id {
                    Some(target) => Ok(self.send_to_participant(&room_id, target, event.clone())),
                    None => Ok(self.broadcast(&room_id, &event, Some(&sender))),
                }
            }
            SignalEvent::RequestSync { .. } => Ok(self.send_to_host(
                &room_id,
                SignalEvent::AskSyncData {
                    requester_id: sender,
                },
            )),
            SignalEvent::ViewerStatusUpdate { status, .. } => {
                match self.membership.update_status(&room_id, &sender, *status) {
                    Some(snapshot) => Ok(self.send_roster(&snapshot)),
                    None => Ok(0),
                }
            }
            SignalEvent::StopBroadcast { .. } => {
                self.require_host(&room_id, &sender)?;
                Ok(self.broadcast(
                    &room_id,
                    &SignalEvent::BroadcastStopped {
                        room_id: room_id.clone(),
                    },
                    Some(&sender),
                ))
            }
            SignalEvent::KickUser { target_id, .. } => {
                self.require_host(&room_id, &sender)?;
                if *target_id == sender {
                    return Err(Error::InvalidEvent("The host cannot kick itself".to_string()));
                }
                self.kick(&room_id, target_id)
            }
            SignalEvent::SendMessage { message } => {
                let length = message.text.trim().chars().count();
                if length == 0 || length > self.max_chat_length {
                    return Err(Error::InvalidEvent(format!(
                        "Chat message length {length} outside 1..={}",
                        self.max_chat_length
                    )));
                }
                Ok(self.broadcast(
                    &room_id,
                    &SignalEvent::ReceiveMessage {
                        message: message.clone(),
                    },
                    Some(&sender),
                ))
            }
            SignalEvent::AskHostName { .. } => Ok(self.send_to_host(
                &room_id,
                SignalEvent::HostNameRequested {
                    requester_id: sender,
                },
            )),
            SignalEvent::ReturnHostName { target_id, .. } => {
                self.require_host(&room_id, &sender)?;
                Ok(self.send_to_participant(&room_id, target_id, event.clone()))
            }
            other => Err(Error::InvalidEvent(format!(
                "{} is only sent by the relay",
                other.event_type()
            ))),
        }
    }

    fn kick(&self, room_id: &RoomId, target_id: &ParticipantId) -> Result<usize> {
        let Some(snapshot) = self.membership.kick(room_id, target_id) else {
            return Ok(0);
        };

        let mut delivered = self.send_to_participant(room_id, target_id, SignalEvent::Kicked);
        // The kicked connection stops receiving room traffic.
        let kicked: Vec<ConnectionId> = self
            .subscribers(room_id)
            .into_iter()
            .filter(|sub| sub.participant_id == *target_id)
            .map(|sub| sub.connection_id)
            .collect();
        for connection_id in kicked {
            self.unbind(&connection_id);
        }
        delivered += self.send_roster(&snapshot);
        Ok(delivered)
    }

    /// Leave the connection's room. Returns deliveries of the new roster.
    fn leave(&self, connection_id: &str) -> usize {
        let Some((room_id, participant_id)) = self.unbind(connection_id) else {
            return 0;
        };
        let Some(snapshot) = self.membership.leave(&room_id, &participant_id) else {
            return 0;
        };
        if snapshot.participants.is_empty() {
            self.membership.prune_empty_rooms();
            return 0;
        }
        self.send_roster(&snapshot)
    }

    fn bind(&self, connection_id: &str, room_id: &RoomId, participant_id: &ParticipantId) {
        if let Some(existing) = self.connections.get(connection_id) {
            if existing.value() == &(room_id.clone(), participant_id.clone()) {
                return;
            }
        }
        self.leave(connection_id);

        self.rooms
            .entry(room_id.clone())
            .or_insert_with(Vec::new)
            .push(Subscriber {
                connection_id: connection_id.to_string(),
                participant_id: participant_id.clone(),
            });
        self.connections.insert(
            connection_id.to_string(),
            (room_id.clone(), participant_id.clone()),
        );

        info!(
            room_id = %room_id,
            participant_id = %participant_id,
            connection_id = %connection_id,
            "Client subscribed to room"
        );
    }

    fn unbind(&self, connection_id: &str) -> Option<(RoomId, ParticipantId)> {
        let (_, (room_id, participant_id)) = self.connections.remove(connection_id)?;

        if let Some(mut subscribers) = self.rooms.get_mut(&room_id) {
            subscribers.retain(|sub| sub.connection_id != connection_id);

            if subscribers.is_empty() {
                drop(subscribers); // Drop the RefMut before removing
                self.rooms.remove(&room_id);
                debug!(room_id = %room_id, "Room has no more subscribers, removed");
            }
        }

        info!(
            room_id = %room_id,
            participant_id = %participant_id,
            connection_id = %connection_id,
            "Client unsubscribed from room"
        );
        Some((room_id, participant_id))
    }

    fn require_host(&self, room_id: &RoomId, participant_id: &ParticipantId) -> Result<()> {
        if self.membership.is_host(room_id, participant_id) {
            Ok(())
        } else {
            Err(Error::NotHost(room_id.clone()))
        }
    }

    fn subscribers(&self, room_id: &RoomId) -> Vec<Subscriber> {
        self.rooms
            .get(room_id)
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default()
    }

    fn send_roster(&self, snapshot: &RosterSnapshot) -> usize {
        self.broadcast(
            &snapshot.room_id,
            &SignalEvent::UpdateUserList {
                participants: snapshot.participants.clone(),
            },
            None,
        )
    }

    fn send_to_host(&self, room_id: &RoomId, event: SignalEvent) -> usize {
        match self.membership.host_of(room_id) {
            Some(host) => self.send_to_participant(room_id, &host.id, event),
            None => {
                debug!(room_id = %room_id, event_type = event.event_type(), "Room has no host");
                0
            }
        }
    }

    fn send_to_participant(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        event: SignalEvent,
    ) -> usize {
        let targets: Vec<Subscriber> = self
            .subscribers(room_id)
            .into_iter()
            .filter(|sub| sub.participant_id == *participant_id)
            .collect();
        self.deliver(room_id, &targets, &event)
    }

    /// Send to every subscriber of the room except `except`.
    fn broadcast(
        &self,
        room_id: &RoomId,
        event: &SignalEvent,
        except: Option<&ParticipantId>,
    ) -> usize {
        let targets: Vec<Subscriber> = self
            .subscribers(room_id)
            .into_iter()
            .filter(|sub| except != Some(&sub.participant_id))
            .collect();
        self.deliver(room_id, &targets, event)
    }

    fn deliver(&self, room_id: &RoomId, targets: &[Subscriber], event: &SignalEvent) -> usize {
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        for subscriber in targets {
            let sender = self
                .senders
                .get(&subscriber.connection_id)
                .map(|tx| tx.value().clone());
            match sender.map(|tx| tx.send(event.clone())) {
                Some(Ok(())) => sent_count += 1,
                _ => {
                    warn!(
                        room_id = %room_id,
                        participant_id = %subscriber.participant_id,
                        connection_id = %subscriber.connection_id,
                        "Failed to send event to client, marking for cleanup"
                    );
                    failed_connections.push(subscriber.connection_id.clone());
                }
            }
        }

        // Clean up failed connections
        for connection_id in failed_connections {
            self.disconnect(&connection_id);
        }

        sent_count
    }

    #[must_use]
    pub fn roster(&self, room_id: &RoomId) -> Vec<Participant> {
        self.membership.roster(room_id)
    }

    #[must_use]
    pub const fn membership(&self) -> &RoomMembershipManager {
        &self.membership
    }

    /// Get the number of subscribers in a room
    #[must_use]
    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |subscribers| subscribers.len())
    }

    /// Get the number of rooms with at least one subscriber
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get total number of open connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }
}

impl std::fmt::Debug for RelayHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHub")
            .field("connections", &self.senders.len())
            .field("rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}
