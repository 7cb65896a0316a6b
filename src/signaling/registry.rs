//! Room registry - room lifecycle, slot table and membership notifications
//!
//! The registry is a plain owned object. It never touches sockets: every
//! operation appends [`Delivery`] records to an outbox that the relay drains
//! and routes to connection handles.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::JoinError;

use super::protocol::{ClientId, RelayKind, RelayPayload, Role, SignalServerMsg};

/// Seats per room
pub const MAX_PLAYERS: usize = 4;

/// Display names are cut to this many characters
pub const NAME_MAX_CHARS: usize = 16;

/// One message addressed to one client
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ClientId,
    pub msg: SignalServerMsg,
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub slot: usize,
    pub role: Role,
    pub host_id: ClientId,
}

/// Result of a leave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: String,
    pub slot: usize,
    pub was_host: bool,
    pub room_destroyed: bool,
}

#[derive(Debug, Clone)]
struct Member {
    name: String,
    slot: usize,
}

/// A room and its fixed slot table
#[derive(Debug)]
pub struct Room {
    id: String,
    slots: [Option<ClientId>; MAX_PLAYERS],
    members: HashMap<ClientId, Member>,
    host_id: Option<ClientId>,
}

impl Room {
    fn new(id: String) -> Self {
        Self {
            id,
            slots: Default::default(),
            members: HashMap::new(),
            host_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host_id(&self) -> Option<&ClientId> {
        self.host_id.as_ref()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn occupancy(&self) -> [bool; MAX_PLAYERS] {
        std::array::from_fn(|i| self.slots[i].is_some())
    }

    /// Slot 0 only for the establishing client, otherwise lowest free slot >= 1
    fn assign_slot(&self) -> Option<usize> {
        if self.host_id.is_none() && self.slots[0].is_none() {
            return Some(0);
        }
        (1..MAX_PLAYERS).find(|&i| self.slots[i].is_none())
    }

    fn room_update(&self) -> SignalServerMsg {
        let names = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .and_then(|id| self.members.get(id))
                    .map(|m| m.name.clone())
            })
            .collect();

        SignalServerMsg::RoomUpdate {
            count: self.members.len(),
            max: MAX_PLAYERS,
            slots: self.occupancy().to_vec(),
            names,
        }
    }

    fn member_ids(&self) -> impl Iterator<Item = &ClientId> {
        self.members.keys()
    }
}

/// Registry of all rooms known to one relay
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    /// client -> room id, for clients currently seated somewhere
    memberships: HashMap<ClientId, String>,
    outbox: Vec<Delivery>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every pending delivery
    pub fn drain(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.outbox)
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_of(&self, client: &ClientId) -> Option<&str> {
        self.memberships.get(client).map(String::as_str)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn client_count(&self) -> usize {
        self.memberships.len()
    }

    /// Seat `client` in `room_id`, creating the room on first join
    pub fn join(
        &mut self,
        client: &ClientId,
        room_id: &str,
        name: Option<&str>,
    ) -> Result<JoinOutcome, JoinError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(JoinError::EmptyRoomId);
        }

        // Switching rooms: leave the old one with full notifications first
        if self.memberships.contains_key(client) {
            self.leave(client);
        }

        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id.to_string()));

        let slot = match room.assign_slot() {
            Some(slot) if room.members.len() < MAX_PLAYERS => slot,
            _ => {
                debug!(client_id = %client, room = %room_id, "Room full");
                self.outbox.push(Delivery {
                    to: client.clone(),
                    msg: SignalServerMsg::RoomFull { max: MAX_PLAYERS },
                });
                return Err(JoinError::RoomFull { max: MAX_PLAYERS });
            }
        };

        let role = if slot == 0 { Role::Host } else { Role::Guest };
        let name = sanitize_name(name, slot);

        room.slots[slot] = Some(client.clone());
        room.members.insert(
            client.clone(),
            Member {
                name: name.clone(),
                slot,
            },
        );
        if role == Role::Host {
            room.host_id = Some(client.clone());
        }
        // slot 0 is always occupied by the host once the room has one
        let host_id = room.host_id.clone().unwrap_or_else(|| client.clone());
        self.memberships.insert(client.clone(), room_id.to_string());

        self.outbox.push(Delivery {
            to: client.clone(),
            msg: SignalServerMsg::Joined {
                id: client.clone(),
                role,
                player_index: slot,
                host_id: host_id.clone(),
                name: name.clone(),
            },
        });

        let update = room.room_update();
        for id in room.member_ids() {
            self.outbox.push(Delivery {
                to: id.clone(),
                msg: update.clone(),
            });
        }

        if role == Role::Guest {
            self.outbox.push(Delivery {
                to: host_id.clone(),
                msg: SignalServerMsg::PeerJoined {
                    id: client.clone(),
                    player_index: slot,
                    name,
                },
            });
        }

        info!(
            client_id = %client,
            room = %room_id,
            slot,
            role = ?role,
            members = room.members.len(),
            "Client joined room"
        );

        Ok(JoinOutcome {
            slot,
            role,
            host_id,
        })
    }

    /// Free the client's slot; tears the room down when the host leaves
    pub fn leave(&mut self, client: &ClientId) -> Option<LeaveOutcome> {
        let room_id = self.memberships.remove(client)?;
        let room = self.rooms.get_mut(&room_id)?;
        let member = room.members.remove(client)?;
        room.slots[member.slot] = None;

        let was_host = room.host_id.as_ref() == Some(client);
        if was_host {
            let remaining: Vec<ClientId> = room.member_ids().cloned().collect();
            for id in &remaining {
                self.memberships.remove(id);
                self.outbox.push(Delivery {
                    to: id.clone(),
                    msg: SignalServerMsg::HostLeft,
                });
            }
            self.rooms.remove(&room_id);
            info!(
                client_id = %client,
                room = %room_id,
                guests = remaining.len(),
                "Host left, room destroyed"
            );
            return Some(LeaveOutcome {
                room_id,
                slot: member.slot,
                was_host,
                room_destroyed: true,
            });
        }

        if let Some(host_id) = room.host_id.clone() {
            if room.members.contains_key(&host_id) {
                self.outbox.push(Delivery {
                    to: host_id,
                    msg: SignalServerMsg::PeerLeft {
                        id: client.clone(),
                        player_index: member.slot,
                    },
                });
            }
        }

        let room_destroyed = room.members.is_empty();
        if room_destroyed {
            self.rooms.remove(&room_id);
        } else {
            let update = room.room_update();
            for id in room.member_ids() {
                self.outbox.push(Delivery {
                    to: id.clone(),
                    msg: update.clone(),
                });
            }
        }

        info!(client_id = %client, room = %room_id, slot = member.slot, "Client left room");

        Some(LeaveOutcome {
            room_id,
            slot: member.slot,
            was_host,
            room_destroyed,
        })
    }

    /// Forward a negotiation payload inside the sender's room.
    /// Returns how many deliveries were queued.
    pub fn relay(
        &mut self,
        from: &ClientId,
        kind: RelayKind,
        to: Option<ClientId>,
        payload: RelayPayload,
    ) -> usize {
        let Some(room) = self.memberships.get(from).and_then(|id| self.rooms.get(id)) else {
            debug!(client_id = %from, kind = kind.as_str(), "Relay from client outside any room");
            return 0;
        };

        // An empty `to` is treated like an absent one
        let target = to.filter(|id| !id.as_str().is_empty());

        if let Some(target) = target {
            if !room.members.contains_key(&target) {
                debug!(client_id = %from, target = %target, "Relay target not in room");
                return 0;
            }
            self.outbox.push(Delivery {
                to: target.clone(),
                msg: SignalServerMsg::relayed(kind, from.clone(), Some(target), payload),
            });
            return 1;
        }

        let mut queued = 0;
        for id in room.member_ids().filter(|id| *id != from) {
            self.outbox.push(Delivery {
                to: id.clone(),
                msg: SignalServerMsg::relayed(kind, from.clone(), None, payload.clone()),
            });
            queued += 1;
        }
        queued
    }
}

/// Trim, cap and default a display name
pub fn sanitize_name(name: Option<&str>, slot: usize) -> String {
    let trimmed: String = name
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(NAME_MAX_CHARS)
        .collect();
    let trimmed = trimmed.trim_end().to_string();
    if trimmed.is_empty() {
        format!("Player {}", slot + 1)
    } else {
        trimmed
    }
}
