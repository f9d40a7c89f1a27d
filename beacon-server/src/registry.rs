//! Addressable registry of live connections and rooms.
//!
//! The registry owns room records; rooms own member id sets; connections keep
//! only a `currentRoomId` back-reference for lookup. Mutations happen under
//! the room's map entry and every mutator captures the member snapshot it
//! needs before releasing, so broadcasts never run while a lock is held.

use crate::connection::ConnectionHandle;
use crate::doc::{apply_update, DocUpdate};
use beacon_core::{ClientId, RoomDoc, RoomId};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct RoomState {
    members: HashSet<ClientId>,
    doc: RoomDoc,
}

/// Membership change in a room the connection left, with the members that
/// remain and still need a presence update.
pub struct Departure {
    pub room_id: RoomId,
    pub remaining: Vec<Arc<ConnectionHandle>>,
}

pub struct JoinOutcome {
    /// Set when the join implicitly left a previous room.
    pub left: Option<Departure>,
    /// Document state at join time, sent to the joiner.
    pub doc: RoomDoc,
    /// Members of the new room, joiner included.
    pub members: Vec<Arc<ConnectionHandle>>,
}

#[derive(Default)]
pub struct RoomRegistry {
    connections: DashMap<ClientId, Arc<ConnectionHandle>>,
    rooms: DashMap<RoomId, RoomState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. False if the client id is already taken; the
    /// existing connection is never displaced.
    pub fn register(&self, conn: Arc<ConnectionHandle>) -> bool {
        match self.connections.entry(conn.client_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
        }
    }

    pub fn get(&self, client_id: &ClientId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(client_id).map(|e| e.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connections_snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Move a connection into `room_id`, creating the room on first join and
    /// implicitly leaving any previous room. Re-joining the current room is
    /// idempotent.
    pub fn join(&self, conn: &Arc<ConnectionHandle>, room_id: RoomId) -> JoinOutcome {
        let left = match conn.current_room() {
            Some(old) if old == room_id => None,
            Some(old) => {
                conn.set_room(None);
                Some(self.remove_member(&old, &conn.client_id))
            }
            None => None,
        };

        let (doc, members) = {
            let mut entry = self.rooms.entry(room_id.clone()).or_default();
            entry.members.insert(conn.client_id.clone());
            conn.set_room(Some(room_id.clone()));
            (entry.doc.clone(), self.collect_handles(&entry.members))
        };

        debug!(client_id = %conn.client_id, room_id = %room_id, "joined room");
        JoinOutcome { left, doc, members }
    }

    /// Leave the current room, if any.
    pub fn leave(&self, conn: &Arc<ConnectionHandle>) -> Option<Departure> {
        let room_id = conn.current_room()?;
        conn.set_room(None);
        Some(self.remove_member(&room_id, &conn.client_id))
    }

    /// Remove a connection entirely: out of its room first, then out of the
    /// connection table. Returns the departure so the caller can notify the
    /// former room after the locks are gone.
    pub fn unregister(&self, conn: &Arc<ConnectionHandle>) -> Option<Departure> {
        self.connections.remove(&conn.client_id);
        self.leave(conn)
    }

    /// Open members of a room.
    pub fn members_of(&self, room_id: &RoomId) -> Vec<Arc<ConnectionHandle>> {
        match self.rooms.get(room_id) {
            Some(entry) => self.collect_handles(&entry.members),
            None => Vec::new(),
        }
    }

    pub fn doc_of(&self, room_id: &RoomId) -> Option<RoomDoc> {
        self.rooms.get(room_id).map(|entry| entry.doc.clone())
    }

    /// Apply a document update under the room's entry lock; version check and
    /// bump are atomic per room. On acceptance the member snapshot for the
    /// `doc-updated` fanout is captured before the lock drops.
    pub fn update_doc(
        &self,
        room_id: &RoomId,
        base_version: Option<u64>,
        payload: &Value,
    ) -> Option<(DocUpdate, Vec<Arc<ConnectionHandle>>)> {
        let mut entry = self.rooms.get_mut(room_id)?;
        let outcome = apply_update(&mut entry.doc, base_version, payload);
        let members = match outcome {
            DocUpdate::Applied { .. } => self.collect_handles(&entry.members),
            DocUpdate::Rejected { .. } => Vec::new(),
        };
        Some((outcome, members))
    }

    /// Resolve a signaling target: the sender's room first, then the whole
    /// connection table; in each scope `userId` wins over `clientId`.
    pub fn resolve_target(
        &self,
        room_id: Option<&RoomId>,
        target: &str,
    ) -> Option<Arc<ConnectionHandle>> {
        if let Some(room) = room_id {
            if let Some(found) = find_target(&self.members_of(room), target) {
                return Some(found);
            }
        }
        find_target(&self.connections_snapshot(), target)
    }

    /// How many rooms list this connection as a member. Always 0 or 1.
    pub fn membership_count(&self, client_id: &ClientId) -> usize {
        self.rooms
            .iter()
            .filter(|entry| entry.value().members.contains(client_id))
            .count()
    }

    fn remove_member(&self, room_id: &RoomId, client_id: &ClientId) -> Departure {
        let remaining = match self.rooms.get_mut(room_id) {
            Some(mut entry) => {
                entry.members.remove(client_id);
                self.collect_handles(&entry.members)
            }
            None => Vec::new(),
        };

        if remaining.is_empty() {
            // The doc goes with the room; empty rooms are not retained.
            self.rooms.remove_if(room_id, |_, state| state.members.is_empty());
        }

        Departure {
            room_id: room_id.clone(),
            remaining,
        }
    }

    fn collect_handles(&self, members: &HashSet<ClientId>) -> Vec<Arc<ConnectionHandle>> {
        members
            .iter()
            .filter_map(|id| self.connections.get(id).map(|e| e.value().clone()))
            .collect()
    }
}

fn find_target(
    handles: &[Arc<ConnectionHandle>],
    target: &str,
) -> Option<Arc<ConnectionHandle>> {
    handles
        .iter()
        .find(|h| h.is_open() && h.user_id() == Some(target))
        .or_else(|| {
            handles
                .iter()
                .find(|h| h.is_open() && h.client_id.as_str() == target)
        })
        .cloned()
}
