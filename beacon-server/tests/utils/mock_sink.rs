use async_trait::async_trait;
use beacon_core::ServerFrame;
use beacon_server::connection::FrameSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// FrameSink that captures everything the server tries to deliver, so tests
/// can assert on outbound traffic without a socket.
#[derive(Clone, Default)]
pub struct MockFrameSink {
    frames: Arc<Mutex<Vec<ServerFrame>>>,
    closed: Arc<AtomicBool>,
    close_info: Arc<Mutex<Option<(u16, String)>>>,
}

impl MockFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every frame captured so far.
    pub fn drain(&self) -> Vec<ServerFrame> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }

    pub fn close_info(&self) -> Option<(u16, String)> {
        self.close_info.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSink for MockFrameSink {
    async fn send(&self, frame: ServerFrame) {
        self.frames.lock().unwrap().push(frame);
    }

    async fn close(&self, code: u16, reason: String) {
        self.closed.store(true, Ordering::SeqCst);
        *self.close_info.lock().unwrap() = Some((code, reason));
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
