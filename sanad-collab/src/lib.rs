//! # sanad-collab: real-time synchronization core for Sanad documents
//!
//! Clients attach to a document page over WebSocket and exchange CRDT
//! deltas that converge without a central lock.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   y-sync frames    ┌──────────────────────────┐
//! │ Client      │ ◄────────────────► │ SyncSession (per conn.)  │
//! └─────────────┘   JSON control     │  └─ Replica (private)    │
//!                                    └────┬────────────┬────────┘
//!                         AccessResolver ─┤            │ publish(exclude self)
//!                                         ▼            ▼
//!                               ┌────────────────┐  ┌────────────────┐
//!                               │ DocumentStore  │  │ BroadcastGroup │
//!                               │ (update log)   │  │ (doc, page)    │
//!                               └───────▲────────┘  └────────────────┘
//!                                       │
//!                               Compactor (periodic, no session affinity)
//! ```
//!
//! ## Modules
//!
//! - [`model`]: documents, update records, access entries, presence
//! - [`storage`]: RocksDB-backed update log and tables
//! - [`replica`]: replica rebuilt by replaying the log
//! - [`access`]: access level resolution and permission setting
//! - [`compaction`]: periodic merge of stale editing sessions
//! - [`protocol`]: binary sync frames and JSON control messages
//! - [`broadcast`]: per (document, page) fan-out with echo suppression
//! - [`session`]: per-connection state machine
//! - [`server`]: WebSocket handshake and I/O loop
//! - [`services`]: authentication, text correction, notification

pub mod access;
pub mod broadcast;
pub mod compaction;
pub mod error;
pub mod model;
pub mod protocol;
pub mod replica;
pub mod server;
pub mod services;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_utils;

pub use access::{AccessResolver, EffectivePermission, Grant, GrantOutcome};
pub use broadcast::{BroadcastGroup, BroadcastStats, Outbound, RoomKey, RoomManager, SessionId};
pub use compaction::{CompactionConfig, CompactionReport, Compactor};
pub use error::{SyncError, SyncResult};
pub use model::{
    AccessEntry, AccessLevel, Document, LinkToken, NewDocument, Page, PresenceRecord,
    UpdateRecord, UserId,
};
pub use protocol::{CheckKind, ControlMessage, Corrections, Frame, ProtocolError};
pub use replica::Replica;
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use services::{
    Authenticator, HttpCorrector, LogNotifier, Notifier, PermissionNotice, Services,
    StaticTokens, TextCorrector, UnavailableCorrector,
};
pub use session::{Action, ConnectionTarget, SessionState, SyncSession, WriteRejection};
pub use storage::{DocumentStore, StoreConfig, StoreError};
