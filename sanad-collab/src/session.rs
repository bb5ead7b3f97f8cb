//! Per-connection sync session.
//!
//! ```text
//! Connecting ──► Authorizing ──► Bootstrapping ──► Active ──► Closed
//!      │              │                                         ▲
//!      └──────────────┴──── NotFound / Deny / bad target ───────┘
//! ```
//!
//! The session owns a private replica rebuilt from the update log. It is
//! transport independent: each inbound message yields one [`Action`] for
//! the I/O loop to carry out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::AccessResolver;
use crate::broadcast::{Outbound, RoomKey, SessionId};
use crate::error::{SyncError, SyncResult};
use crate::model::{AccessLevel, Page, UserId};
use crate::protocol::{CheckKind, ControlMessage, Frame};
use crate::replica::Replica;
use crate::storage::DocumentStore;

/// v1 encoding of an update with no structs and no deletions.
const EMPTY_UPDATE: &[u8] = &[0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authorizing,
    Bootstrapping,
    Active,
    Closed,
}

/// What to do with a write from a session below Writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteRejection {
    /// Log and discard the message; the connection stays open.
    #[default]
    Drop,
    /// Close the connection with a policy-violation frame.
    Close,
}

impl FromStr for WriteRejection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(WriteRejection::Drop),
            "close" => Ok(WriteRejection::Close),
            other => Err(format!("unknown write rejection policy '{other}'")),
        }
    }
}

/// Document and page named by the connection target, plus the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub doc_id: Uuid,
    pub page: Page,
    pub token: Option<String>,
}

impl ConnectionTarget {
    /// Parse `[/ws]/docs/{uuid}[/{page}][/]` and an optional
    /// `Authorization=<token>` query parameter.
    pub fn parse(path: &str, query: Option<&str>) -> SyncResult<Self> {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        if segments.peek() == Some(&"ws") {
            segments.next();
        }
        if segments.next() != Some("docs") {
            return Err(SyncError::malformed(format!("unrecognized target {path}")));
        }
        let doc_id = segments
            .next()
            .ok_or_else(|| SyncError::malformed("missing document id"))?
            .parse::<Uuid>()
            .map_err(SyncError::malformed)?;
        let page = segments
            .next()
            .map(|p| p.parse::<u32>().map_err(SyncError::malformed))
            .transpose()?;
        if segments.next().is_some() {
            return Err(SyncError::malformed(format!("unrecognized target {path}")));
        }

        let token = query.and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "Authorization")
                .map(|(_, value)| value.to_string())
        });

        Ok(Self { doc_id, page, token })
    }

    pub fn room(&self) -> RoomKey {
        RoomKey::new(self.doc_id, self.page)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}/{page}", self.doc_id),
            None => write!(f, "{}", self.doc_id),
        }
    }
}

/// Outcome of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a binary frame back to this peer only.
    Reply(Vec<u8>),
    /// Fan out to the other sessions of the room.
    Broadcast(Outbound),
    /// Ask the correction service; answer this peer only.
    Correct { kind: CheckKind, text: String },
    /// End the connection (policy violation).
    Close(String),
    /// Nothing to do.
    Ignore,
}

pub struct SyncSession {
    id: SessionId,
    user: UserId,
    target: ConnectionTarget,
    level: AccessLevel,
    state: SessionState,
    replica: Replica,
    store: Arc<DocumentStore>,
    write_rejection: WriteRejection,
}

impl SyncSession {
    /// A freshly accepted transport with an authenticated principal.
    pub fn connect(
        store: Arc<DocumentStore>,
        user: UserId,
        target: ConnectionTarget,
        write_rejection: WriteRejection,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            target,
            level: AccessLevel::Deny,
            state: SessionState::Connecting,
            replica: Replica::new(),
            store,
            write_rejection,
        }
    }

    /// Resolve the document and the principal's level.
    ///
    /// Fails with `NotFound` for an unknown document and `PermissionDenied`
    /// for a Deny-level principal; the session is then closed.
    pub fn authorize(&mut self, access: &AccessResolver) -> SyncResult<AccessLevel> {
        self.expect_state(SessionState::Connecting)?;
        self.state = SessionState::Authorizing;

        let level = match access.resolve(self.user, self.target.doc_id) {
            Ok(level) if level.can_read() => level,
            Ok(_) => {
                self.state = SessionState::Closed;
                return Err(SyncError::denied(format!(
                    "{} has no access to {}",
                    self.user, self.target.doc_id
                )));
            }
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };
        self.level = level;
        log::debug!("Session {} authorized {} as {level} on {}", self.id, self.user, self.target);
        Ok(level)
    }

    /// Record presence, rebuild the replica and return the sync step 1
    /// frame (local state vector) to send first.
    ///
    /// Call after joining the room: a document deleted before this point
    /// fails with `NotFound`, one deleted after it terminates the room.
    pub fn bootstrap(&mut self) -> SyncResult<Vec<u8>> {
        self.expect_state(SessionState::Authorizing)?;
        self.state = SessionState::Bootstrapping;

        if let Err(e) = self.load() {
            self.state = SessionState::Closed;
            return Err(e);
        }

        self.state = SessionState::Active;
        log::info!(
            "Session {} active on {} ({} records replayed, {} skipped)",
            self.id,
            self.target,
            self.replica.applied(),
            self.replica.skipped()
        );
        Ok(Frame::SyncStep1(self.replica.encoded_state_vector()).encode())
    }

    fn load(&mut self) -> SyncResult<()> {
        self.store.get_document(self.target.doc_id)?;
        // Refused with NotFound once the document is gone.
        self.store
            .open_presence(self.target.doc_id, self.user, self.id)?;
        let records = self
            .store
            .stream_since(self.target.doc_id, self.target.page, None)?;
        self.replica = Replica::build_from(&records);
        Ok(())
    }

    /// Handle a binary frame.
    ///
    /// `MalformedPayload` errors concern this one message only; the caller
    /// logs and drops it.
    pub fn handle_binary(&mut self, bytes: &[u8]) -> SyncResult<Action> {
        self.expect_state(SessionState::Active)?;

        match Frame::decode(bytes)? {
            Frame::SyncStep1(state_vector) => {
                let diff = self.replica.diff_encoded(&state_vector)?;
                Ok(Action::Reply(Frame::SyncStep2(diff).encode()))
            }
            Frame::SyncStep2(delta) | Frame::Update(delta) => self.accept_write(bytes, &delta),
            Frame::Awareness(_) => Ok(Action::Broadcast(Outbound::Binary(Arc::new(bytes.to_vec())))),
            Frame::Other(tag) => {
                log::trace!("Session {} ignoring frame tag {tag}", self.id);
                Ok(Action::Ignore)
            }
        }
    }

    fn accept_write(&mut self, frame: &[u8], delta: &[u8]) -> SyncResult<Action> {
        // Handshake replies and re-sent history are not writes, whoever sends them.
        if delta == EMPTY_UPDATE || !self.replica.is_new(delta)? {
            log::trace!("Session {} sent nothing new", self.id);
            return Ok(Action::Ignore);
        }
        if !self.level.can_write() {
            log::warn!(
                "Rejected write from {} ({}) on {}",
                self.user,
                self.level,
                self.target
            );
            return Ok(match self.write_rejection {
                WriteRejection::Drop => Action::Ignore,
                WriteRejection::Close => {
                    Action::Close(format!("{} may not write", self.level))
                }
            });
        }
        self.replica.apply(delta)?;
        self.store
            .append_update(self.target.doc_id, self.target.page, Some(self.user), delta)?;
        Ok(Action::Broadcast(Outbound::Binary(Arc::new(frame.to_vec()))))
    }

    /// Handle a JSON control message.
    pub fn handle_text(&mut self, text: &str) -> SyncResult<Action> {
        self.expect_state(SessionState::Active)?;

        let msg = ControlMessage::parse(text)?;
        if let Some((kind, body)) = msg.check() {
            return Ok(Action::Correct {
                kind,
                text: body.to_string(),
            });
        }
        Ok(Action::Broadcast(Outbound::Text(Arc::from(text))))
    }

    /// Run the disconnect path. Returns `false` if it already ran.
    ///
    /// A session that got past authorization always leaves a presence row.
    pub fn close(&mut self) -> bool {
        let reached = match self.state {
            SessionState::Closed => return false,
            SessionState::Bootstrapping | SessionState::Active => true,
            SessionState::Connecting | SessionState::Authorizing => false,
        };
        self.state = SessionState::Closed;

        if reached {
            if let Err(e) = self
                .store
                .touch_presence(self.target.doc_id, self.user, self.id)
            {
                log::warn!("Failed to update presence for session {}: {e}", self.id);
            }
        }
        log::info!("Session {} closed ({} on {})", self.id, self.user, self.target);
        true
    }

    fn expect_state(&self, expected: SessionState) -> SyncResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::malformed(format!(
                "session {} is {:?}, expected {expected:?}",
                self.id, self.state
            )))
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn level(&self) -> AccessLevel {
        self.level
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.close();
    }
}
