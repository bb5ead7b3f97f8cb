//! Persistent data model: documents, update records, access entries, presence.
//!
//! ```text
//! Document ──┬── UpdateRecord (raw | compacted)   per (doc, page)
//!            ├── AccessEntry                      per (user, doc)
//!            └── PresenceRecord                   per (doc, user, connection)
//! ```
//!
//! A document exclusively owns its records; deleting it cascades.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Users are owned by the external identity service; only their id is known here.
pub type UserId = Uuid;

/// Independently synchronized partition of a document. `None` is the whole document.
pub type Page = Option<u32>;

/// Current time at the precision timestamps are stored with (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ───────────────────────────────────────────────────────────────────
// Access levels
// ───────────────────────────────────────────────────────────────────

/// Ordered permission grade.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum AccessLevel {
    Deny = 0,
    ReadOnly = 1,
    #[default]
    Writer = 2,
    Admin = 3,
    Owner = 4,
}

impl AccessLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AccessLevel::Deny),
            1 => Some(AccessLevel::ReadOnly),
            2 => Some(AccessLevel::Writer),
            3 => Some(AccessLevel::Admin),
            4 => Some(AccessLevel::Owner),
            _ => None,
        }
    }

    /// Writer and above may persist document mutations.
    pub fn can_write(self) -> bool {
        self >= AccessLevel::Writer
    }

    pub fn can_read(self) -> bool {
        self >= AccessLevel::ReadOnly
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Deny => "Deny",
            AccessLevel::ReadOnly => "ReadOnly",
            AccessLevel::Writer => "Writer",
            AccessLevel::Admin => "Admin",
            AccessLevel::Owner => "Owner",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "deny" => Ok(AccessLevel::Deny),
            "readonly" => Ok(AccessLevel::ReadOnly),
            "writer" => Ok(AccessLevel::Writer),
            "admin" => Ok(AccessLevel::Admin),
            "owner" => Ok(AccessLevel::Owner),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Documents
// ───────────────────────────────────────────────────────────────────

/// Length of a generated link token.
pub const LINK_LENGTH: usize = 12;

/// Short human-shareable document handle. Unique and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkToken(String);

impl LinkToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Derive a token from a seed (title + timestamp).
    ///
    /// SHA-256 hex digest with every decimal digit mapped to a letter
    /// (`0` → `a` … `9` → `j`), truncated to [`LINK_LENGTH`].
    pub fn generate(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let token: String = format!("{digest:x}")
            .chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => (b'a' + d as u8) as char,
                None => c,
            })
            .take(LINK_LENGTH)
            .collect();
        Self(token)
    }

    /// Seed used by the creation hook.
    pub fn seed(title: &str, at: DateTime<Utc>) -> String {
        format!("{title}{}", at.timestamp_micros())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dashed display form: a dash after every three characters.
    pub fn dashed(&self) -> String {
        let mut out = String::with_capacity(self.0.len() + self.0.len() / 3);
        for (i, c) in self.0.chars().enumerate() {
            if i > 0 && i % 3 == 0 {
                out.push('-');
            }
            out.push(c);
        }
        out
    }
}

impl fmt::Display for LinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A collaborative document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub link: LinkToken,
    pub title: String,
    /// `None` once the owning account is gone.
    pub owner: Option<UserId>,
    pub default_access: AccessLevel,
    pub is_public: bool,
    /// Lets non-admins alter permissions.
    pub public_permission_access: bool,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn is_owner(&self, user: UserId) -> bool {
        self.owner == Some(user)
    }
}

/// Creation request for [`crate::storage::DocumentStore::create_document`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub owner: UserId,
    pub default_access: AccessLevel,
    pub is_public: bool,
    pub public_permission_access: bool,
    /// Pre-assigned link; generated by the creation hook when absent.
    pub link: Option<LinkToken>,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, owner: UserId) -> Self {
        Self {
            title: title.into(),
            owner,
            default_access: AccessLevel::default(),
            is_public: false,
            public_permission_access: false,
            link: None,
        }
    }

    pub fn default_access(mut self, level: AccessLevel) -> Self {
        self.default_access = level;
        self
    }

    pub fn public_permission_access(mut self, enabled: bool) -> Self {
        self.public_permission_access = enabled;
        self
    }

    pub fn link(mut self, link: LinkToken) -> Self {
        self.link = Some(link);
        self
    }
}

// ───────────────────────────────────────────────────────────────────
// Update records
// ───────────────────────────────────────────────────────────────────

/// One CRDT delta in the append-only log.
///
/// Raw records carry a single `author` and no `authors` set; compacted
/// records carry the distinct author set and a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: Uuid,
    pub doc_id: Uuid,
    pub page: Page,
    pub payload: Vec<u8>,
    pub author: Option<UserId>,
    pub compacted: bool,
    pub processed: bool,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    pub authors: Option<BTreeSet<UserId>>,
    pub title: Option<String>,
}

impl UpdateRecord {
    /// A live edit accepted from a session.
    pub fn raw(
        doc_id: Uuid,
        page: Page,
        author: Option<UserId>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            doc_id,
            page,
            payload,
            author,
            compacted: false,
            processed: false,
            created_at,
            authors: None,
            title: None,
        }
    }

    /// The merged replacement for a compaction session.
    pub fn compacted(
        doc_id: Uuid,
        page: Page,
        authors: BTreeSet<UserId>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
        title: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            doc_id,
            page,
            payload,
            author: None,
            compacted: true,
            processed: true,
            created_at,
            authors: Some(authors),
            title: Some(title),
        }
    }

    /// Eligible for compaction.
    pub fn is_raw(&self) -> bool {
        !self.compacted && !self.processed
    }
}

// ───────────────────────────────────────────────────────────────────
// Access entries & presence
// ───────────────────────────────────────────────────────────────────

/// Explicit permission grant, unique per (user, document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub user_id: UserId,
    pub doc_id: Uuid,
    pub level: AccessLevel,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

/// "Last seen" row for one connection lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub doc_id: Uuid,
    pub user_id: UserId,
    pub connection_id: Uuid,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub viewed_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub last_active: DateTime<Utc>,
}
