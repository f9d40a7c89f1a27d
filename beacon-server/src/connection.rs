//! Per-connection state and the outbound frame sink seam.

use async_trait::async_trait;
use beacon_core::{unix_ms_now, ClientId, Identity, PeerDescriptor, RoomId, ServerFrame};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Items queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

/// Boundary the registry and dispatcher deliver through. The production
/// implementation enqueues onto the connection's writer task; tests install a
/// capturing mock.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: ServerFrame);
    async fn close(&self, code: u16, reason: String);
    fn is_open(&self) -> bool;
}

/// Sink backed by the writer task's unbounded queue.
pub struct SocketSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SocketSink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FrameSink for SocketSink {
    async fn send(&self, frame: ServerFrame) {
        match serde_json::to_string(&frame) {
            Ok(json) => {
                if self.tx.send(Outbound::Frame(json)).is_err() {
                    warn!("dropping frame for closed connection");
                }
            }
            Err(e) => warn!("failed to serialize outbound frame: {e}"),
        }
    }

    async fn close(&self, code: u16, reason: String) {
        let _ = self.tx.send(Outbound::Close { code, reason });
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Transport-level metadata captured at upgrade time.
#[derive(Debug, Clone)]
pub struct TransportMeta {
    pub remote_addr: SocketAddr,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

/// Mutable record for one live connection. Mutated only by its own socket
/// tasks; everyone else reads snapshots or enqueues through the sink.
pub struct ConnectionHandle {
    pub client_id: ClientId,
    pub identity: Option<Identity>,
    pub meta: TransportMeta,
    sink: Box<dyn FrameSink>,
    room: Mutex<Option<RoomId>>,
    alive: AtomicBool,
    missed_pings: AtomicU32,
    open: AtomicBool,
    last_activity_ms: AtomicI64,
}

impl ConnectionHandle {
    pub fn new(
        client_id: ClientId,
        identity: Option<Identity>,
        meta: TransportMeta,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            client_id,
            identity,
            meta,
            sink,
            room: Mutex::new(None),
            alive: AtomicBool::new(true),
            missed_pings: AtomicU32::new(0),
            open: AtomicBool::new(true),
            last_activity_ms: AtomicI64::new(unix_ms_now()),
        }
    }

    /// Principal identity when authenticated, transport identity otherwise.
    /// Relay lookups and `from` stamps resolve through this.
    pub fn peer_id(&self) -> String {
        self.identity
            .as_ref()
            .map(|id| id.user_id.clone())
            .unwrap_or_else(|| self.client_id.to_string())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|id| id.user_id.as_str())
    }

    pub fn current_room(&self) -> Option<RoomId> {
        self.room
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_room(&self, room: Option<RoomId>) {
        *self
            .room
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = room;
    }

    pub fn descriptor(&self, room_id: &RoomId) -> PeerDescriptor {
        PeerDescriptor {
            id: self.peer_id(),
            origin: self.meta.origin.clone(),
            user_agent: self.meta.user_agent.clone(),
            remote_address: self.meta.remote_addr.to_string(),
            room_id: room_id.clone(),
        }
    }

    pub async fn send(&self, frame: ServerFrame) {
        self.sink.send(frame).await;
    }

    pub async fn close(&self, code: u16, reason: &str) {
        self.sink.close(code, reason.to_string()).await;
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.sink.is_open()
    }

    /// Flip to closed; true only for the caller that made the transition, so
    /// cleanup runs exactly once.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(unix_ms_now(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    // Liveness flags owned by the heartbeat supervisor.

    pub(crate) fn swap_alive(&self, value: bool) -> bool {
        self.alive.swap(value, Ordering::SeqCst)
    }

    pub(crate) fn reset_missed(&self) {
        self.missed_pings.store(0, Ordering::SeqCst);
    }

    pub(crate) fn bump_missed(&self) -> u32 {
        self.missed_pings.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id())
            .field("room", &self.current_room())
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}
