pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod doc;
pub mod gate;
pub mod heartbeat;
pub mod http;
pub mod limit;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;

pub use auth::{TokenError, TokenVerifier};
pub use config::ServerConfig;
pub use connection::{ConnectionHandle, FrameSink, Outbound, SocketSink, TransportMeta};
pub use dispatch::Dispatcher;
pub use doc::DocUpdate;
pub use heartbeat::{HeartbeatSupervisor, HeartbeatVerdict};
pub use limit::{ConnectLimiter, MessageLimiter};
pub use registry::{Departure, JoinOutcome, RoomRegistry};
pub use server::{router, run, AppState};
