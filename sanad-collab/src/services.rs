//! External collaborators: identity, text correction, notification.
//!
//! The sync core only sees these traits. Concrete implementations here are
//! the small ones the server binary wires by default.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::model::{AccessLevel, UserId};
use crate::protocol::{CheckKind, Corrections};

// ───────────────────────────────────────────────────────────────────
// Authentication
// ───────────────────────────────────────────────────────────────────

/// Maps a previously issued token to a principal.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: Option<&str>) -> SyncResult<UserId>;
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, UserId>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    pub fn insert(&mut self, token: impl Into<String>, user: UserId) {
        self.tokens.insert(token.into(), user);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: Option<&str>) -> SyncResult<UserId> {
        let token = token.ok_or_else(|| SyncError::Unauthenticated("missing token".into()))?;
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| SyncError::Unauthenticated("unknown token".into()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Text correction
// ───────────────────────────────────────────────────────────────────

/// Opaque spelling/grammar service.
#[async_trait]
pub trait TextCorrector: Send + Sync {
    async fn correct(&self, kind: CheckKind, text: &str) -> SyncResult<Corrections>;
}

#[derive(Serialize)]
struct CorrectionRequest<'a> {
    kind: CheckKind,
    text: &'a str,
}

#[derive(Deserialize)]
struct CorrectionResponse {
    #[serde(default)]
    corrections: BTreeMap<String, String>,
}

/// Corrector backed by an HTTP endpoint.
///
/// `POST {url}` with `{"kind": "spell"|"grammar", "text": ...}`, expecting
/// `{"corrections": {fragment: replacement}}` back.
pub struct HttpCorrector {
    url: String,
    client: Client,
}

impl HttpCorrector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::TransientDependencyFailure(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl TextCorrector for HttpCorrector {
    async fn correct(&self, kind: CheckKind, text: &str) -> SyncResult<Corrections> {
        let unavailable = |e: reqwest::Error| SyncError::TransientDependencyFailure(e.to_string());
        let response = self
            .client
            .post(&self.url)
            .json(&CorrectionRequest { kind, text })
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        let body: CorrectionResponse = response.json().await.map_err(unavailable)?;
        Ok(Corrections::of(kind, body.corrections))
    }
}

/// Used when no correction endpoint is configured.
#[derive(Debug, Default)]
pub struct UnavailableCorrector;

#[async_trait]
impl TextCorrector for UnavailableCorrector {
    async fn correct(&self, _kind: CheckKind, _text: &str) -> SyncResult<Corrections> {
        Err(SyncError::TransientDependencyFailure(
            "text correction service not configured".into(),
        ))
    }
}

// ───────────────────────────────────────────────────────────────────
// Notification
// ───────────────────────────────────────────────────────────────────

/// A permission change to tell a user about.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionNotice {
    pub doc_id: Uuid,
    pub doc_title: String,
    pub recipient: UserId,
    pub level: AccessLevel,
    pub message: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &PermissionNotice) -> SyncResult<()>;
}

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &PermissionNotice) -> SyncResult<()> {
        log::info!(
            "Notify {}: granted {} on \"{}\" ({})",
            notice.recipient,
            notice.level,
            notice.doc_title,
            notice.doc_id
        );
        Ok(())
    }
}

/// The collaborators a server is wired with.
#[derive(Clone)]
pub struct Services {
    pub authenticator: Arc<dyn Authenticator>,
    pub corrector: Arc<dyn TextCorrector>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            corrector: Arc::new(UnavailableCorrector),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn TextCorrector>) -> Self {
        self.corrector = corrector;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}
