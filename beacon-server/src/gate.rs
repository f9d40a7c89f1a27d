//! Upgrade gate and per-connection runtime.
//!
//! The gate runs origin, auth, and connect-rate checks before completing the
//! WebSocket handshake. Each accepted socket gets a writer task draining its
//! outbound queue (which also drives the heartbeat) and a reader task feeding
//! the dispatcher; when either exits the other is aborted and cleanup runs
//! exactly once.

use crate::connection::{ConnectionHandle, Outbound, SocketSink, TransportMeta};
use crate::heartbeat::{HeartbeatSupervisor, HeartbeatVerdict};
use crate::presence::peer_list;
use crate::server::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use beacon_core::{reason, ClientId, Identity, RoomId, ServerFrame, ServerFrameKind};
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = header_str(&headers, header::ORIGIN);
    let user_agent = header_str(&headers, header::USER_AGENT);

    if state.config.production {
        let allowed = origin
            .as_deref()
            .map(|o| origin_allowed(o, &state.config.allowed_origins))
            .unwrap_or(false);
        if !allowed {
            warn!(?origin, %remote_addr, "rejecting upgrade: origin not allowed");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let mut identity: Option<Identity> = None;
    if state.config.production {
        match state.verifier.verify(params.token.as_deref()) {
            Ok(id) => identity = Some(id),
            Err(e) => {
                warn!(%remote_addr, error = %e, "rejecting upgrade: token verification failed");
                return (StatusCode::UNAUTHORIZED, e.reason()).into_response();
            }
        }
    } else if params.token.is_some() {
        // Development mode: honor a token when one is presented, but a bad
        // one only downgrades the connection to anonymous.
        match state.verifier.verify(params.token.as_deref()) {
            Ok(id) => identity = Some(id),
            Err(e) => debug!(%remote_addr, error = %e, "ignoring invalid token in development mode"),
        }
    }

    // Query userId may override the token identity outside production.
    if !state.config.production {
        if let (Some(identity), Some(user_id)) = (identity.as_mut(), params.user_id.clone()) {
            identity.user_id = user_id;
        }
    }

    if let Err(retry) = state.connect_limiter.check_upgrade(remote_addr.ip()) {
        let secs = retry.as_secs().max(1);
        warn!(%remote_addr, "rejecting upgrade: connect rate limit");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs.to_string())],
        )
            .into_response();
    }

    if state.draining.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let client_id = params
        .user_id
        .clone()
        .map(ClientId::from)
        .unwrap_or_else(ClientId::generate);
    if state.registry.get(&client_id).is_some() {
        warn!(%client_id, "rejecting upgrade: client id already connected");
        return StatusCode::CONFLICT.into_response();
    }

    let room_hint = params
        .room_id
        .clone()
        .or_else(|| identity.as_ref().and_then(|id| id.room_id.clone()));

    let meta = TransportMeta {
        remote_addr,
        origin,
        user_agent,
    };

    ws.on_upgrade(move |socket| run_connection(socket, state, client_id, identity, meta, room_hint))
        .into_response()
}

async fn run_connection(
    mut socket: WebSocket,
    state: AppState,
    client_id: ClientId,
    identity: Option<Identity>,
    meta: TransportMeta,
    room_hint: Option<String>,
) {
    // The gate's checks raced the handshake; re-verify what can have changed.
    if state.draining.load(Ordering::SeqCst) {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "Server shutting down".into(),
            })))
            .await;
        return;
    }

    let remote_ip = meta.remote_addr.ip();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let conn = Arc::new(ConnectionHandle::new(
        client_id,
        identity,
        meta,
        Box::new(SocketSink::new(tx)),
    ));

    if !state.registry.register(conn.clone()) {
        warn!(client_id = %conn.client_id, "client id registered while upgrading");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: reason::AUTH_FAILED.into(),
            })))
            .await;
        return;
    }

    info!(client_id = %conn.client_id, user_id = ?conn.user_id(), "connection established");
    state.connect_limiter.on_connected(remote_ip);

    conn.send(connected_frame(&state, &conn, room_hint.as_deref()))
        .await;

    let supervisor = Arc::new(HeartbeatSupervisor::new(
        conn.clone(),
        &state.config.heartbeat,
    ));

    let (ws_tx, ws_rx) = socket.split();
    let mut send_task = tokio::spawn(writer_loop(
        ws_tx,
        rx,
        supervisor.clone(),
        state.config.heartbeat.interval,
    ));
    let mut recv_task = tokio::spawn(reader_loop(
        ws_rx,
        state.clone(),
        conn.clone(),
        supervisor,
    ));

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    cleanup(&state, &conn, remote_ip).await;
    info!(client_id = %conn.client_id, "connection closed");
}

/// Initial `connected` frame: the assigned client id plus a presence snapshot
/// of the room named at upgrade time (joining stays explicit).
fn connected_frame(state: &AppState, conn: &Arc<ConnectionHandle>, room_hint: Option<&str>) -> ServerFrame {
    let peers = room_hint
        .and_then(|hint| RoomId::parse(hint).ok())
        .map(|room_id| peer_list(&state.registry.members_of(&room_id), &room_id))
        .unwrap_or_default();

    ServerFrame::from_server(
        ServerFrameKind::Connected,
        json!({
            "clientId": &conn.client_id,
            "userId": conn.user_id(),
            "peers": peers,
        }),
    )
}

async fn writer_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    supervisor: Arc<HeartbeatSupervisor>,
    heartbeat_interval: std::time::Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.reset(); // skip the immediate first tick

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(Outbound::Frame(json)) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = heartbeat.tick() => match supervisor.on_tick() {
                HeartbeatVerdict::Probe => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                HeartbeatVerdict::Wait => {}
                HeartbeatVerdict::Terminate => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "going away".into(),
                        })))
                        .await;
                    break;
                }
            },
        }
    }
}

async fn reader_loop(
    mut ws_rx: SplitStream<WebSocket>,
    state: AppState,
    conn: Arc<ConnectionHandle>,
    supervisor: Arc<HeartbeatSupervisor>,
) {
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client_id = %conn.client_id, error = %e, "transport error");
                break;
            }
        };

        match msg {
            Message::Text(text) => dispatch_guarded(&state, &conn, text.as_str()).await,
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => dispatch_guarded(&state, &conn, &text).await,
                Err(_) => {
                    conn.send(ServerFrame::error(json!({
                        "reason": reason::INVALID_JSON,
                        "message": "binary frame is not valid UTF-8",
                    })))
                    .await;
                }
            },
            Message::Pong(_) => supervisor.on_pong(),
            Message::Close(_) => break,
            // The transport layer answers pings on its own.
            _ => {}
        }
    }
}

/// Dispatch one frame; a handler panic is reported as `server_error` and the
/// connection stays open.
async fn dispatch_guarded(state: &AppState, conn: &Arc<ConnectionHandle>, text: &str) {
    let dispatch = state.dispatcher.dispatch_text(conn, text);
    if AssertUnwindSafe(dispatch).catch_unwind().await.is_err() {
        error!(client_id = %conn.client_id, "dispatcher panicked while handling a frame");
        conn.send(ServerFrame::error(json!({ "reason": reason::SERVER_ERROR })))
            .await;
    }
}

async fn cleanup(state: &AppState, conn: &Arc<ConnectionHandle>, remote_ip: std::net::IpAddr) {
    state.disconnect(conn).await;
    state.connect_limiter.on_disconnected(remote_ip);
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Allow-list check by exact hostname or one subdomain level below it.
pub fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    let origin_host = host_of(origin);
    allowed.iter().any(|entry| {
        let allowed_host = host_of(entry);
        if origin_host == allowed_host {
            return true;
        }
        origin_host
            .strip_suffix(allowed_host)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty() && !label.contains('.'))
    })
}

fn host_of(value: &str) -> &str {
    let without_scheme = value
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(value);
    without_scheme
        .split_once('/')
        .map(|(host, _)| host)
        .unwrap_or(without_scheme)
}
