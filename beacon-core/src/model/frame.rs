use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Error reason strings as they appear on the wire.
pub mod reason {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const INVALID_MESSAGE: &str = "invalid_message";
    pub const UNKNOWN_TYPE: &str = "unknown_type";
    pub const AUTH_REQUIRED: &str = "auth_required";
    pub const AUTH_FAILED: &str = "auth_failed";
    pub const TOKEN_EXPIRED: &str = "token_expired";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const SERVER_ERROR: &str = "server_error";
    pub const JOIN_REQUIRES_ROOM: &str = "join requires roomId";
}

/// Milliseconds since the Unix epoch, as stamped on every outbound frame.
pub fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFrame {
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFrame {
    #[serde(default)]
    pub room_id: Option<String>,
    pub text: Value,
    #[serde(default)]
    pub base_version: Option<u64>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Body of a relayed frame (`offer` / `answer` / `ice-candidate` / `cursor`).
/// Everything the client sent besides the envelope fields is kept verbatim in
/// `body` and re-emitted as the recipient's `payload`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalFrame {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// Recognized inbound frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Join(JoinFrame),
    Leave,
    GetPeers,
    GetDoc,
    Update(UpdateFrame),
    Cursor(SignalFrame),
    Offer(SignalFrame),
    Answer(SignalFrame),
    IceCandidate(SignalFrame),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("malformed `{kind}` frame: {detail}")]
    InvalidShape { kind: String, detail: String },
}

impl FrameError {
    /// Wire reason this decode failure maps to.
    pub fn reason(&self) -> &'static str {
        match self {
            FrameError::InvalidJson(_) => reason::INVALID_JSON,
            FrameError::MissingType | FrameError::InvalidShape { .. } => reason::INVALID_MESSAGE,
            FrameError::UnknownType(_) => reason::UNKNOWN_TYPE,
        }
    }
}

/// Decode one inbound frame. Decoding is two-phase so an unknown `type` tag
/// and a known tag with a bad body report different reasons.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();

    let frame = match kind.as_str() {
        "join" | "join-room" => ClientFrame::Join(decode_body(&kind, value)?),
        "leave" => ClientFrame::Leave,
        "get-peers" => ClientFrame::GetPeers,
        "get-doc" | "request-doc" => ClientFrame::GetDoc,
        "update" => ClientFrame::Update(decode_body(&kind, value)?),
        "cursor" => ClientFrame::Cursor(signal_body(&kind, value)?),
        "offer" => ClientFrame::Offer(signal_body(&kind, value)?),
        "answer" => ClientFrame::Answer(signal_body(&kind, value)?),
        "ice-candidate" | "ice" => ClientFrame::IceCandidate(signal_body(&kind, value)?),
        other => return Err(FrameError::UnknownType(other.to_string())),
    };

    Ok(frame)
}

fn decode_body<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|e| FrameError::InvalidShape {
        kind: kind.to_string(),
        detail: e.to_string(),
    })
}

fn signal_body(kind: &str, value: Value) -> Result<SignalFrame, FrameError> {
    let mut frame: SignalFrame = decode_body(kind, value)?;
    // The flattened remainder still carries the envelope tag.
    frame.body.remove("type");
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerFrameKind {
    Connected,
    Joined,
    Left,
    Doc,
    DocUpdated,
    UpdateRejected,
    PeersUpdated,
    Cursor,
    Offer,
    Answer,
    IceCandidate,
    Error,
}

/// Outbound envelope. `from` is `"server"` for frames the server originates
/// and the sender's identity for relayed ones.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: ServerFrameKind,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub payload: Value,
    pub timestamp: i64,
}

pub const SERVER_SENDER: &str = "server";

impl ServerFrame {
    pub fn from_server(kind: ServerFrameKind, payload: Value) -> Self {
        Self {
            kind,
            from: SERVER_SENDER.to_string(),
            to: None,
            payload,
            timestamp: unix_ms_now(),
        }
    }

    pub fn from_peer(kind: ServerFrameKind, from: String, to: Option<String>, payload: Value) -> Self {
        Self {
            kind,
            from,
            to,
            payload,
            timestamp: unix_ms_now(),
        }
    }

    pub fn error(payload: Value) -> Self {
        Self::from_server(ServerFrameKind::Error, payload)
    }
}
