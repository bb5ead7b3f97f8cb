//! Wire protocol for sync sessions.
//!
//! Binary frames follow the y-protocols layout (lib0 variable-length
//! integers, length-prefixed payloads):
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────────────────┐
//! │ tag: var │ subtype: var │ payload: var_len + bytes │   tag 0 (sync)
//! ├──────────┼──────────────┴──────────────────────────┤
//! │ tag: var │ awareness update: var_len + bytes        │   tag 1 (awareness)
//! └──────────┴─────────────────────────────────────────┘
//! ```
//!
//! Sync subtypes: `0` step 1 (state vector), `1` step 2 (diff), `2` update.
//! Awareness frames are the presence marker: relayed, never persisted.
//!
//! Text frames carry JSON control messages with a `type` field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;

use crate::error::SyncError;

pub const TAG_SYNC: u32 = 0;
pub const TAG_AWARENESS: u32 = 1;

pub const SYNC_STEP1: u32 = 0;
pub const SYNC_STEP2: u32 = 1;
pub const SYNC_UPDATE: u32 = 2;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame error: {0}")]
    Frame(String),

    #[error("unknown sync subtype {0}")]
    UnknownSubtype(u32),

    #[error("control message error: {0}")]
    Control(#[from] serde_json::Error),
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        SyncError::malformed(e)
    }
}

// ───────────────────────────────────────────────────────────────────
// Binary frames
// ───────────────────────────────────────────────────────────────────

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Peer's state vector; answered with [`Frame::SyncStep2`].
    SyncStep1(Vec<u8>),
    /// Diff answering a state vector.
    SyncStep2(Vec<u8>),
    /// Incremental update.
    Update(Vec<u8>),
    /// Presence/cursor ping. The inner bytes are opaque to the server.
    Awareness(Vec<u8>),
    /// Any other top-level tag (auth, awareness query). Ignored.
    Other(u32),
}

impl Frame {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let tag: u32 = cursor.read_var().map_err(frame_err)?;
        match tag {
            TAG_SYNC => {
                let subtype: u32 = cursor.read_var().map_err(frame_err)?;
                let payload = cursor.read_buf().map_err(frame_err)?.to_vec();
                match subtype {
                    SYNC_STEP1 => Ok(Frame::SyncStep1(payload)),
                    SYNC_STEP2 => Ok(Frame::SyncStep2(payload)),
                    SYNC_UPDATE => Ok(Frame::Update(payload)),
                    other => Err(ProtocolError::UnknownSubtype(other)),
                }
            }
            TAG_AWARENESS => {
                let payload = cursor.read_buf().map_err(frame_err)?.to_vec();
                Ok(Frame::Awareness(payload))
            }
            other => Ok(Frame::Other(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Frame::SyncStep1(p) => write_sync(&mut buf, SYNC_STEP1, p),
            Frame::SyncStep2(p) => write_sync(&mut buf, SYNC_STEP2, p),
            Frame::Update(p) => write_sync(&mut buf, SYNC_UPDATE, p),
            Frame::Awareness(p) => {
                buf.write_var(TAG_AWARENESS);
                buf.write_buf(p);
            }
            Frame::Other(tag) => buf.write_var(*tag),
        }
        buf
    }

    /// Frames that would mutate the document if accepted.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Frame::SyncStep2(_) | Frame::Update(_))
    }
}

fn write_sync(buf: &mut Vec<u8>, subtype: u32, payload: &[u8]) {
    buf.write_var(TAG_SYNC);
    buf.write_var(subtype);
    buf.write_buf(payload);
}

fn frame_err(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Frame(e.to_string())
}

// ───────────────────────────────────────────────────────────────────
// Text control messages
// ───────────────────────────────────────────────────────────────────

/// Payload of a comment/reply event. Opaque: forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub text: String,
}

/// Closed set of recognized text messages, dispatched on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "comment_created")]
    CommentCreated(EventBody),
    #[serde(rename = "comment_updated")]
    CommentUpdated(EventBody),
    #[serde(rename = "comment_deleted")]
    CommentDeleted(EventBody),
    #[serde(rename = "reply_created")]
    ReplyCreated(EventBody),
    #[serde(rename = "reply_updated")]
    ReplyUpdated(EventBody),
    #[serde(rename = "reply_deleted")]
    ReplyDeleted(EventBody),
    SpellCheck(CheckRequest),
    GrammarCheck(CheckRequest),
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The correction request carried by this message, if any.
    pub fn check(&self) -> Option<(CheckKind, &str)> {
        match self {
            ControlMessage::SpellCheck(req) => Some((CheckKind::Spell, &req.text)),
            ControlMessage::GrammarCheck(req) => Some((CheckKind::Grammar, &req.text)),
            _ => None,
        }
    }
}

/// Which correction the requester asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Spell,
    Grammar,
}

/// Correction result: misspelled or ungrammatical fragment → replacement.
///
/// Always serialized with both keys; the one not requested stays empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corrections {
    #[serde(rename = "Spell", default)]
    pub spell: BTreeMap<String, String>,
    #[serde(rename = "Grammar", default)]
    pub grammar: BTreeMap<String, String>,
}

impl Corrections {
    /// Place `found` under the key matching `kind`.
    pub fn of(kind: CheckKind, found: BTreeMap<String, String>) -> Self {
        match kind {
            CheckKind::Spell => Self {
                spell: found,
                ..Self::default()
            },
            CheckKind::Grammar => Self {
                grammar: found,
                ..Self::default()
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| error_reply(&e.to_string()))
    }
}

/// `{"Error": reason}` sent to a requester whose check failed.
pub fn error_reply(reason: &str) -> String {
    serde_json::json!({ "Error": reason }).to_string()
}
