//! Presence fan-out.
//!
//! After every membership transition the affected room gets a `peers-updated`
//! frame. The peer list is shared; `count` is personalized (peers other than
//! the recipient), so each member receives its own copy.

use crate::connection::ConnectionHandle;
use beacon_core::{PeerDescriptor, RoomId, ServerFrame, ServerFrameKind};
use serde_json::json;
use std::sync::Arc;

/// Descriptors for the open members of a room snapshot.
pub fn peer_list(members: &[Arc<ConnectionHandle>], room_id: &RoomId) -> Vec<PeerDescriptor> {
    members
        .iter()
        .filter(|m| m.is_open())
        .map(|m| m.descriptor(room_id))
        .collect()
}

/// Send `peers-updated` to every open member of the snapshot. Empty rooms get
/// nothing.
pub async fn broadcast_presence(members: &[Arc<ConnectionHandle>], room_id: &RoomId) {
    let peers = peer_list(members, room_id);
    if peers.is_empty() {
        return;
    }

    for member in members.iter().filter(|m| m.is_open()) {
        member.send(presence_frame(room_id, &peers)).await;
    }
}

/// The frame a single recipient sees for the given peer list.
pub fn presence_frame(room_id: &RoomId, peers: &[PeerDescriptor]) -> ServerFrame {
    ServerFrame::from_server(
        ServerFrameKind::PeersUpdated,
        json!({
            "roomId": room_id,
            "peers": peers,
            "total": peers.len(),
            "count": peers.len().saturating_sub(1),
        }),
    )
}
