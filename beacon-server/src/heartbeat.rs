//! Per-connection liveness supervision.
//!
//! The socket's writer task ticks the supervisor on a fixed interval: a live
//! connection is marked stale and probed, a stale one accrues missed pings,
//! and enough misses terminate the transport. Any pong resets the cycle.

use crate::config::HeartbeatSettings;
use crate::connection::ConnectionHandle;
use std::sync::Arc;
use tracing::debug;

/// What the socket loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Send a ping and wait for the pong.
    Probe,
    /// Ping already outstanding; keep waiting.
    Wait,
    /// Too many missed pings, terminate the transport.
    Terminate,
}

pub struct HeartbeatSupervisor {
    conn: Arc<ConnectionHandle>,
    max_missed: u32,
}

impl HeartbeatSupervisor {
    pub fn new(conn: Arc<ConnectionHandle>, settings: &HeartbeatSettings) -> Self {
        Self {
            conn,
            max_missed: settings.max_missed,
        }
    }

    pub fn on_tick(&self) -> HeartbeatVerdict {
        if self.conn.swap_alive(false) {
            return HeartbeatVerdict::Probe;
        }

        let missed = self.conn.bump_missed();
        if missed >= self.max_missed {
            debug!(client_id = %self.conn.client_id, missed, "heartbeat expired");
            HeartbeatVerdict::Terminate
        } else {
            HeartbeatVerdict::Wait
        }
    }

    pub fn on_pong(&self) {
        self.conn.swap_alive(true);
        self.conn.reset_missed();
        self.conn.touch();
    }
}
