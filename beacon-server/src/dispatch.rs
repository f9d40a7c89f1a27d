//! Inbound frame dispatch.
//!
//! Frames pass the per-connection rate limiter, a size bound, and the
//! two-phase decoder before being routed by type. Every failure is answered
//! with an `error` frame on the same connection; dispatch never closes it.

use crate::connection::ConnectionHandle;
use crate::doc::DocUpdate;
use crate::limit::MessageLimiter;
use crate::presence::{broadcast_presence, peer_list, presence_frame};
use crate::registry::RoomRegistry;
use crate::relay::{broadcast_to_room, relay_signal};
use beacon_core::{
    decode_client_frame, reason, ClientFrame, JoinFrame, RoomId, ServerFrame, ServerFrameKind,
    SignalFrame, UpdateFrame,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
    limiter: Arc<MessageLimiter>,
    max_frame_bytes: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RoomRegistry>,
        limiter: Arc<MessageLimiter>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            registry,
            limiter,
            max_frame_bytes,
        }
    }

    /// Handle one text frame from `conn`.
    pub async fn dispatch_text(&self, conn: &Arc<ConnectionHandle>, text: &str) {
        conn.touch();

        if let Err(retry) = self.limiter.check(&conn.client_id) {
            let retry_after = retry.as_secs_f64().ceil().max(1.0) as u64;
            conn.send(ServerFrame::error(json!({
                "reason": reason::RATE_LIMITED,
                "retryAfter": retry_after,
            })))
            .await;
            return;
        }

        if text.len() > self.max_frame_bytes {
            conn.send(ServerFrame::error(json!({
                "reason": reason::INVALID_JSON,
                "message": format!("frame exceeds {} bytes", self.max_frame_bytes),
            })))
            .await;
            return;
        }

        let frame = match decode_client_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client_id = %conn.client_id, error = %e, "rejecting inbound frame");
                conn.send(ServerFrame::error(json!({
                    "reason": e.reason(),
                    "message": e.to_string(),
                })))
                .await;
                return;
            }
        };

        self.route(conn, frame).await;
    }

    async fn route(&self, conn: &Arc<ConnectionHandle>, frame: ClientFrame) {
        match frame {
            ClientFrame::Join(join) => self.handle_join(conn, join).await,
            ClientFrame::Leave => self.handle_leave(conn).await,
            ClientFrame::GetPeers => self.handle_get_peers(conn).await,
            ClientFrame::GetDoc => self.handle_get_doc(conn).await,
            ClientFrame::Update(update) => self.handle_update(conn, update).await,
            ClientFrame::Cursor(signal) => {
                broadcast_to_room(
                    &self.registry,
                    conn,
                    ServerFrameKind::Cursor,
                    serde_json::Value::Object(signal.body),
                )
                .await
            }
            ClientFrame::Offer(signal) => self.relay(conn, ServerFrameKind::Offer, signal).await,
            ClientFrame::Answer(signal) => self.relay(conn, ServerFrameKind::Answer, signal).await,
            ClientFrame::IceCandidate(signal) => {
                self.relay(conn, ServerFrameKind::IceCandidate, signal).await
            }
        }
    }

    async fn relay(&self, conn: &Arc<ConnectionHandle>, kind: ServerFrameKind, signal: SignalFrame) {
        relay_signal(&self.registry, conn, kind, signal).await;
    }

    async fn handle_join(&self, conn: &Arc<ConnectionHandle>, join: JoinFrame) {
        let Some(raw) = join.room_id.filter(|r| !r.is_empty()) else {
            conn.send(ServerFrame::error(json!({
                "reason": reason::JOIN_REQUIRES_ROOM,
            })))
            .await;
            return;
        };

        let room_id = match RoomId::parse(raw) {
            Ok(id) => id,
            Err(e) => {
                conn.send(ServerFrame::error(json!({
                    "reason": reason::INVALID_MESSAGE,
                    "message": e.to_string(),
                })))
                .await;
                return;
            }
        };

        let outcome = self.registry.join(conn, room_id.clone());

        conn.send(ServerFrame::from_server(
            ServerFrameKind::Joined,
            json!({ "roomId": room_id.as_str() }),
        ))
        .await;
        conn.send(ServerFrame::from_server(
            ServerFrameKind::Doc,
            json!({
                "roomId": room_id.as_str(),
                "version": outcome.doc.version,
                "text": outcome.doc.text,
            }),
        ))
        .await;

        if let Some(left) = outcome.left {
            broadcast_presence(&left.remaining, &left.room_id).await;
        }
        broadcast_presence(&outcome.members, &room_id).await;
    }

    async fn handle_leave(&self, conn: &Arc<ConnectionHandle>) {
        match self.registry.leave(conn) {
            Some(departure) => {
                conn.send(ServerFrame::from_server(
                    ServerFrameKind::Left,
                    json!({ "roomId": departure.room_id.as_str() }),
                ))
                .await;
                broadcast_presence(&departure.remaining, &departure.room_id).await;
            }
            None => {
                conn.send(ServerFrame::from_server(
                    ServerFrameKind::Left,
                    json!({ "roomId": null }),
                ))
                .await;
            }
        }
    }

    async fn handle_get_peers(&self, conn: &Arc<ConnectionHandle>) {
        match conn.current_room() {
            Some(room_id) => {
                let members = self.registry.members_of(&room_id);
                let peers = peer_list(&members, &room_id);
                conn.send(presence_frame(&room_id, &peers)).await;
            }
            None => {
                conn.send(ServerFrame::from_server(
                    ServerFrameKind::PeersUpdated,
                    json!({ "roomId": null, "peers": [], "total": 0, "count": 0 }),
                ))
                .await;
            }
        }
    }

    async fn handle_get_doc(&self, conn: &Arc<ConnectionHandle>) {
        let doc = conn
            .current_room()
            .and_then(|room_id| self.registry.doc_of(&room_id).map(|doc| (room_id, doc)));

        match doc {
            Some((room_id, doc)) => {
                conn.send(ServerFrame::from_server(
                    ServerFrameKind::Doc,
                    json!({
                        "roomId": room_id.as_str(),
                        "version": doc.version,
                        "text": doc.text,
                    }),
                ))
                .await;
            }
            None => {
                conn.send(ServerFrame::error(json!({
                    "reason": reason::INVALID_MESSAGE,
                    "message": "document requests require joining a room",
                })))
                .await;
            }
        }
    }

    async fn handle_update(&self, conn: &Arc<ConnectionHandle>, update: UpdateFrame) {
        let Some(room_id) = conn.current_room() else {
            conn.send(ServerFrame::error(json!({
                "reason": reason::INVALID_MESSAGE,
                "message": "updates require joining a room",
            })))
            .await;
            return;
        };

        if let Some(requested) = update.room_id.as_deref() {
            if requested != room_id.as_str() {
                conn.send(ServerFrame::error(json!({
                    "reason": reason::INVALID_MESSAGE,
                    "message": "roomId does not match the joined room",
                })))
                .await;
                return;
            }
        }

        let Some((outcome, members)) =
            self.registry
                .update_doc(&room_id, update.base_version, &update.text)
        else {
            conn.send(ServerFrame::error(json!({
                "reason": reason::INVALID_MESSAGE,
                "message": "room no longer exists",
            })))
            .await;
            return;
        };

        match outcome {
            DocUpdate::Applied { version, text } => {
                let author = update.user_id.unwrap_or_else(|| conn.peer_id());
                let frame = ServerFrame::from_server(
                    ServerFrameKind::DocUpdated,
                    json!({
                        "roomId": room_id.as_str(),
                        "version": version,
                        "text": text,
                        "author": author,
                    }),
                );
                for member in members.iter().filter(|m| m.is_open()) {
                    member.send(frame.clone()).await;
                }
            }
            DocUpdate::Rejected {
                current_version,
                text,
            } => {
                conn.send(ServerFrame::from_server(
                    ServerFrameKind::UpdateRejected,
                    json!({
                        "currentVersion": current_version,
                        "text": text,
                    }),
                ))
                .await;
            }
        }
    }
}
