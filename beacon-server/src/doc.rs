//! Last-writer-wins document coordination.
//!
//! No merging: an update is accepted iff the client based it on the current
//! version, and accepted updates advance the version by exactly one. Version
//! reads and writes happen under the owning room's registry entry, so
//! per-room updates are serialized.

use beacon_core::RoomDoc;
use serde_json::Value;

/// Outcome of one `update` attempt against a room document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocUpdate {
    /// Update applied; broadcast `doc-updated` to the whole room.
    Applied { version: u64, text: String },
    /// Stale base version; only the sender learns the current state.
    Rejected { current_version: u64, text: String },
}

/// Apply an optimistic-concurrency update. A missing `base_version` means
/// "last writer wins unconditionally".
pub fn apply_update(doc: &mut RoomDoc, base_version: Option<u64>, payload: &Value) -> DocUpdate {
    if let Some(base) = base_version {
        if base != doc.version {
            return DocUpdate::Rejected {
                current_version: doc.version,
                text: doc.text.clone(),
            };
        }
    }

    doc.version += 1;
    doc.text = text_of(payload);
    DocUpdate::Applied {
        version: doc.version,
        text: doc.text.clone(),
    }
}

/// String form of the client payload: JSON strings verbatim, anything else
/// serialized.
fn text_of(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
