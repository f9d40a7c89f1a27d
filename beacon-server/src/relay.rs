//! Signaling relay for `offer` / `answer` / `ice-candidate` (and `cursor`
//! fan-out, which shares the delivery path minus target resolution).
//!
//! Delivery is best-effort: a recipient's failure is logged and never
//! surfaced to the sender. Per-(sender, recipient) ordering holds because
//! each recipient's frames are enqueued from the sender's dispatch task in
//! arrival order.

use crate::connection::ConnectionHandle;
use crate::registry::RoomRegistry;
use beacon_core::{ServerFrame, ServerFrameKind, SignalFrame};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Relay one signaling frame from `sender`. Directed frames go to the unique
/// open target (room members first, then any connection; `userId` before
/// `clientId`); undirected frames and unresolvable targets fan out to the
/// sender's room, sender excluded.
pub async fn relay_signal(
    registry: &RoomRegistry,
    sender: &Arc<ConnectionHandle>,
    kind: ServerFrameKind,
    signal: SignalFrame,
) {
    let room_id = sender.current_room();
    let payload = Value::Object(signal.body);

    if let Some(target_id) = signal.to.as_deref() {
        if let Some(target) = registry.resolve_target(room_id.as_ref(), target_id) {
            let frame = ServerFrame::from_peer(
                kind,
                sender.peer_id(),
                Some(target_id.to_string()),
                payload,
            );
            target.send(frame).await;
            return;
        }
        debug!(target = target_id, "signal target not found, falling back to room fanout");
    }

    broadcast_to_room(registry, sender, kind, payload).await;
}

/// Fan a frame out to the sender's room, excluding the sender.
pub async fn broadcast_to_room(
    registry: &RoomRegistry,
    sender: &Arc<ConnectionHandle>,
    kind: ServerFrameKind,
    payload: Value,
) {
    let Some(room_id) = sender.current_room() else {
        return;
    };

    let frame = ServerFrame::from_peer(kind, sender.peer_id(), None, payload);
    for member in registry.members_of(&room_id) {
        if member.client_id == sender.client_id || !member.is_open() {
            continue;
        }
        member.send(frame.clone()).await;
    }
}
