//! Connect- and message-level rate limiting.
//!
//! Two independent limiters: upgrade attempts are counted per remote address
//! in a fixed window with a concurrent-socket cap, and inbound frames drain a
//! per-connection token bucket.

use crate::config::{ConnectLimitSettings, MessageLimitSettings};
use beacon_core::ClientId;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_per_sec = capacity / refill_window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last: Instant::now(),
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Token-bucket limiter keyed by connection id.
pub struct MessageLimiter {
    buckets: DashMap<ClientId, TokenBucket>,
    settings: MessageLimitSettings,
}

impl MessageLimiter {
    pub fn new(settings: MessageLimitSettings) -> Self {
        Self {
            buckets: DashMap::new(),
            settings,
        }
    }

    /// Charge one frame against `client_id`. `Err` carries the suggested
    /// retry-after delay.
    pub fn check(&self, client_id: &ClientId) -> Result<(), Duration> {
        let mut bucket = self
            .buckets
            .entry(client_id.clone())
            .or_insert_with(|| TokenBucket::new(self.settings.burst, self.settings.refill_window));
        bucket.try_acquire()
    }

    /// Drop the bucket when the owning connection goes away.
    pub fn forget(&self, client_id: &ClientId) {
        self.buckets.remove(client_id);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[derive(Debug)]
struct AddrEntry {
    window_start: Instant,
    attempts: u32,
    concurrent: u32,
    last_activity: Instant,
}

/// Per-address upgrade limiter: a fixed attempt window plus a cap on
/// concurrently open sockets.
pub struct ConnectLimiter {
    addrs: DashMap<IpAddr, AddrEntry>,
    settings: ConnectLimitSettings,
}

impl ConnectLimiter {
    pub fn new(settings: ConnectLimitSettings) -> Self {
        Self {
            addrs: DashMap::new(),
            settings,
        }
    }

    /// Record an upgrade attempt. `Err` carries the retry-after delay for the
    /// 429 response.
    pub fn check_upgrade(&self, addr: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.addrs.entry(addr).or_insert_with(|| AddrEntry {
            window_start: now,
            attempts: 0,
            concurrent: 0,
            last_activity: now,
        });
        entry.last_activity = now;

        if now.duration_since(entry.window_start) >= self.settings.window {
            entry.window_start = now;
            entry.attempts = 0;
        }

        if entry.concurrent >= self.settings.max_concurrent {
            return Err(self.settings.window);
        }

        if entry.attempts >= self.settings.max_attempts {
            let elapsed = now.duration_since(entry.window_start);
            return Err(self.settings.window.saturating_sub(elapsed));
        }

        entry.attempts += 1;
        Ok(())
    }

    pub fn on_connected(&self, addr: IpAddr) {
        if let Some(mut entry) = self.addrs.get_mut(&addr) {
            entry.concurrent += 1;
            entry.last_activity = Instant::now();
        }
    }

    pub fn on_disconnected(&self, addr: IpAddr) {
        if let Some(mut entry) = self.addrs.get_mut(&addr) {
            entry.concurrent = entry.concurrent.saturating_sub(1);
            entry.last_activity = Instant::now();
        }
    }

    /// Drop counters whose last activity fell outside the window and that
    /// have no open sockets left.
    pub fn sweep(&self) {
        let window = self.settings.window;
        let now = Instant::now();
        self.addrs
            .retain(|_, entry| entry.concurrent > 0 || now.duration_since(entry.last_activity) < window);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.addrs.len()
    }
}
