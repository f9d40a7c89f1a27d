mod frame;
mod identity;
mod peer;
mod room;
mod signaling;

pub use frame::{
    decode_client_frame, reason, unix_ms_now, ClientFrame, FrameError, JoinFrame, ServerFrame,
    ServerFrameKind, SignalFrame, UpdateFrame, SERVER_SENDER,
};
pub use identity::Identity;
pub use peer::{ClientId, PeerDescriptor};
pub use room::{InvalidRoomId, RoomDoc, RoomId};
pub use signaling::IceServerConfig;
