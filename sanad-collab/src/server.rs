//! WebSocket sync server.
//!
//! ```text
//! Client A ──┐   handshake: target → authenticate → authorize
//!            ├── SyncSession (private Replica) ──► DocumentStore (RocksDB)
//! Client B ──┘          │
//!                       └── BroadcastGroup (doc, page) ──► other sessions
//! ```
//!
//! The handshake is refused (404/403/401/400) before the upgrade when the
//! target, principal or document does not check out; the connection never
//! reaches `101 Switching Protocols` in that case.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::access::AccessResolver;
use crate::broadcast::{BroadcastGroup, Outbound, RoomManager};
use crate::error::{SyncError, SyncResult};
use crate::protocol::error_reply;
use crate::services::Services;
use crate::session::{Action, ConnectionTarget, SyncSession, WriteRejection};
use crate::storage::DocumentStore;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Handling of writes from sessions below Writer
    pub write_rejection: WriteRejection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            write_rejection: WriteRejection::default(),
        }
    }
}

impl ServerConfig {
    /// Ephemeral port on the loopback.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub total_messages: u64,
    pub dropped_messages: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<DocumentStore>,
    access: AccessResolver,
    rooms: RoomManager,
    services: Services,
    stats: RwLock<ServerStats>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, store: Arc<DocumentStore>, services: Services) -> Self {
        Self {
            config,
            access: AccessResolver::new(store.clone()),
            store,
            rooms: RoomManager::new(),
            services,
            stats: RwLock::new(ServerStats::default()),
        }
    }

    /// Bind the configured address and serve forever.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Sync server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let mut opened: Option<SyncSession> = None;
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            match self.open_session(req) {
                Ok(session) => {
                    opened = Some(session);
                    Ok(resp)
                }
                Err(e) => {
                    log::warn!("Rejected handshake from {addr} for {}: {e}", req.uri());
                    Err(rejection(&e))
                }
            }
        };

        let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                self.stats.write().await.rejected_handshakes += 1;
                log::debug!("Handshake with {addr} failed: {e}");
                return;
            }
        };
        let Some(mut session) = opened else {
            return;
        };

        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Join before replaying so nothing published in between is missed.
        let key = session.target().room();
        let (room, mut inbox) = self.rooms.join(key, session.id()).await;

        match session.bootstrap() {
            Ok(step1) => {
                if let Err(e) = self.pump(&mut session, ws, &room, &mut inbox, step1).await {
                    log::debug!("Connection {} from {addr} ended: {e}", session.id());
                }
            }
            Err(e) => log::warn!("Bootstrap of session {} failed: {e}", session.id()),
        }

        self.rooms.leave(&key, &session.id()).await;
        session.close();
        self.stats.write().await.active_connections -= 1;
    }

    /// Connecting + Authorizing, run inside the handshake callback.
    fn open_session(&self, req: &Request) -> SyncResult<SyncSession> {
        let target = ConnectionTarget::parse(req.uri().path(), req.uri().query())?;
        let user = self
            .services
            .authenticator
            .authenticate(target.token.as_deref())?;
        let mut session =
            SyncSession::connect(self.store.clone(), user, target, self.config.write_rejection);
        session.authorize(&self.access)?;
        Ok(session)
    }

    /// The Active loop: inbound frames, room fan-out, correction replies.
    async fn pump(
        &self,
        session: &mut SyncSession,
        ws: WebSocketStream<TcpStream>,
        room: &BroadcastGroup,
        inbox: &mut mpsc::UnboundedReceiver<Outbound>,
        step1: Vec<u8>,
    ) -> Result<(), tungstenite::Error> {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

        ws_tx.send(Message::Binary(step1.into())).await?;

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let outcome = match msg {
                        Some(Ok(Message::Binary(data))) => session.handle_binary(&data),
                        Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
                        Some(Ok(Message::Ping(data))) => {
                            ws_tx.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Session {} disconnected", session.id());
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e),
                        Some(Ok(_)) => continue,
                    };
                    self.stats.write().await.total_messages += 1;

                    match outcome {
                        Ok(Action::Reply(bytes)) => ws_tx.send(Message::Binary(bytes.into())).await?,
                        Ok(Action::Broadcast(out)) => {
                            let delivered = room.publish(out, Some(session.id())).await;
                            log::trace!("Session {} fanned out to {delivered} peers", session.id());
                        }
                        Ok(Action::Correct { kind, text }) => {
                            let corrector = self.services.corrector.clone();
                            let reply_tx = reply_tx.clone();
                            tokio::spawn(async move {
                                let reply = match corrector.correct(kind, &text).await {
                                    Ok(corrections) => corrections.to_json(),
                                    Err(e) => {
                                        log::warn!("Correction request failed: {e}");
                                        error_reply(&e.to_string())
                                    }
                                };
                                let _ = reply_tx.send(reply);
                            });
                        }
                        Ok(Action::Close(reason)) => {
                            ws_tx.send(close_frame(CloseCode::Policy, reason)).await?;
                            return Ok(());
                        }
                        Ok(Action::Ignore) => {}
                        Err(e) => {
                            self.stats.write().await.dropped_messages += 1;
                            log::warn!("Dropped message from session {}: {e}", session.id());
                        }
                    }
                }

                Some(out) = inbox.recv() => match out {
                    Outbound::Binary(bytes) => {
                        ws_tx.send(Message::Binary(bytes.as_ref().clone().into())).await?;
                    }
                    Outbound::Text(text) => {
                        ws_tx.send(Message::Text(text.to_string().into())).await?;
                    }
                    Outbound::Terminate => {
                        ws_tx.send(close_frame(CloseCode::Away, "document deleted".into())).await?;
                        return Ok(());
                    }
                },

                Some(reply) = reply_rx.recv() => {
                    ws_tx.send(Message::Text(reply.into())).await?;
                }
            }
        }
    }

    /// Delete a document with all of its records and end every session
    /// attached to it. Returns how many sessions were terminated.
    pub async fn delete_document(&self, doc_id: Uuid) -> SyncResult<usize> {
        self.store.delete_document(doc_id)?;
        let terminated = self.rooms.terminate_document(doc_id).await;
        log::info!("Document {doc_id} deleted, {terminated} sessions terminated");
        Ok(terminated)
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn access(&self) -> &AccessResolver {
        &self.access
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}

/// HTTP status for a refused handshake.
pub fn rejection_status(e: &SyncError) -> StatusCode {
    match e {
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        SyncError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        SyncError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        SyncError::TransientDependencyFailure(_) | SyncError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn rejection(e: &SyncError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(e.to_string()));
    *response.status_mut() = rejection_status(e);
    response
}

fn close_frame(code: CloseCode, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
