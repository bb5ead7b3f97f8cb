//! Fan-out between sessions attached to the same (document, page).
//!
//! Each member registers an unbounded sender; `publish` clones the message
//! handle into every member's queue except the originator's. Unbounded
//! queues mean a slow reader never loses a message, only buffers it.
//!
//! ```text
//!  Session A ──publish(msg, exclude=A)──► Group (doc, page)
//!                                          ├──► Session B queue
//!                                          └──► Session C queue
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::model::Page;

/// Identifies one connected session.
pub type SessionId = Uuid;

/// Group key: sessions only hear peers on the same page of the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub doc_id: Uuid,
    pub page: Page,
}

impl RoomKey {
    pub fn new(doc_id: Uuid, page: Page) -> Self {
        Self { doc_id, page }
    }
}

/// Message delivered to a member's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Arc<Vec<u8>>),
    Text(Arc<str>),
    /// The document is gone; the session must close.
    Terminate,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_published: u64,
    pub deliveries: u64,
    pub active_members: usize,
}

/// A broadcast group for a single (document, page).
pub struct BroadcastGroup {
    members: RwLock<HashMap<SessionId, mpsc::UnboundedSender<Outbound>>>,
    published: AtomicU64,
    deliveries: AtomicU64,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
        }
    }

    /// Register a session; returns the receiving end of its queue.
    pub async fn join(&self, session: SessionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.write().await.insert(session, tx);
        rx
    }

    pub async fn leave(&self, session: &SessionId) -> bool {
        self.members.write().await.remove(session).is_some()
    }

    /// Deliver `msg` to every member except `exclude`.
    ///
    /// Returns the number of members the message was queued for.
    pub async fn publish(&self, msg: Outbound, exclude: Option<SessionId>) -> usize {
        let members = self.members.read().await;
        let mut delivered = 0;
        for (id, tx) in members.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn has_member(&self, session: &SessionId) -> bool {
        self.members.read().await.contains_key(session)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            active_members: self.member_count().await,
        }
    }
}

impl Default for BroadcastGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps (document, page) to broadcast groups.
#[derive(Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomKey, Arc<BroadcastGroup>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session` to the group for `key`, creating the group if needed.
    ///
    /// Lookup and insertion happen under the rooms write lock, so a
    /// concurrent [`leave`](Self::leave) never drops a group a session
    /// has just joined.
    pub async fn join(
        &self,
        key: RoomKey,
        session: SessionId,
    ) -> (Arc<BroadcastGroup>, mpsc::UnboundedReceiver<Outbound>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(key)
            .or_insert_with(|| Arc::new(BroadcastGroup::new()))
            .clone();
        let inbox = room.join(session).await;
        (room, inbox)
    }

    /// Remove `session` from the group for `key` and drop the group once it
    /// is empty. Returns whether the group was dropped.
    pub async fn leave(&self, key: &RoomKey, session: &SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(key).cloned() else {
            return false;
        };
        room.leave(session).await;
        if room.member_count().await == 0 {
            rooms.remove(key);
            return true;
        }
        false
    }

    pub async fn get(&self, key: &RoomKey) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(key).cloned()
    }

    /// Send [`Outbound::Terminate`] to every session of a document, on
    /// every page, and forget those groups. Returns the sessions signalled.
    pub async fn terminate_document(&self, doc_id: Uuid) -> usize {
        let removed: Vec<Arc<BroadcastGroup>> = {
            let mut rooms = self.rooms.write().await;
            let keys: Vec<RoomKey> = rooms.keys().filter(|k| k.doc_id == doc_id).copied().collect();
            keys.iter().filter_map(|k| rooms.remove(k)).collect()
        };
        let mut signalled = 0;
        for room in removed {
            signalled += room.publish(Outbound::Terminate, None).await;
        }
        signalled
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(bytes: &[u8]) -> Outbound {
        Outbound::Binary(Arc::new(bytes.to_vec()))
    }

    #[tokio::test]
    async fn test_publish_excludes_sender() {
        let group = BroadcastGroup::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = group.join(a).await;
        let mut rx_b = group.join(b).await;
        let mut rx_c = group.join(c).await;

        let delivered = group.publish(binary(&[1, 2, 3]), Some(a)).await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_b.recv().await, Some(binary(&[1, 2, 3])));
        assert_eq!(rx_c.recv().await, Some(binary(&[1, 2, 3])));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_member_keeps_every_message() {
        let group = BroadcastGroup::new();
        let sender = Uuid::new_v4();
        let mut slow = group.join(Uuid::new_v4()).await;

        for i in 0..1_000u32 {
            group.publish(binary(&i.to_le_bytes()), Some(sender)).await;
        }
        for i in 0..1_000u32 {
            assert_eq!(slow.recv().await, Some(binary(&i.to_le_bytes())));
        }
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let group = BroadcastGroup::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _rx_a = group.join(a).await;
        let mut rx_b = group.join(b).await;

        assert!(group.leave(&b).await);
        assert!(!group.leave(&b).await);
        assert_eq!(group.publish(binary(&[9]), Some(a)).await, 0);
        assert_eq!(rx_b.recv().await, None);
    }

    #[tokio::test]
    async fn test_stats() {
        let group = BroadcastGroup::new();
        let a = Uuid::new_v4();
        let _rx_a = group.join(a).await;
        let _rx_b = group.join(Uuid::new_v4()).await;
        group.publish(Outbound::Text("{}".into()), Some(a)).await;

        let stats = group.stats().await;
        assert_eq!(
            stats,
            BroadcastStats { messages_published: 1, deliveries: 1, active_members: 2 }
        );
    }

    #[tokio::test]
    async fn test_rooms_isolated_by_page() {
        let manager = RoomManager::new();
        let doc = Uuid::new_v4();
        let (page_one, _rx_one) = manager.join(RoomKey::new(doc, Some(1)), Uuid::new_v4()).await;
        let (page_two, mut rx_two) = manager.join(RoomKey::new(doc, Some(2)), Uuid::new_v4()).await;
        let (again, _rx_again) = manager.join(RoomKey::new(doc, Some(1)), Uuid::new_v4()).await;

        assert!(Arc::ptr_eq(&page_one, &again));
        assert!(!Arc::ptr_eq(&page_one, &page_two));
        assert_eq!(page_one.member_count().await, 2);

        page_one.publish(binary(&[1]), None).await;
        assert!(rx_two.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_drops_empty_room() {
        let manager = RoomManager::new();
        let key = RoomKey::new(Uuid::new_v4(), None);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _rx_a = manager.join(key, a).await;
        let _rx_b = manager.join(key, b).await;

        assert!(!manager.leave(&key, &a).await);
        assert_eq!(manager.room_count().await, 1);
        assert!(manager.leave(&key, &b).await);
        assert_eq!(manager.room_count().await, 0);
        assert!(!manager.leave(&key, &b).await);
    }

    #[tokio::test]
    async fn test_join_during_last_leave_shares_one_room() {
        let manager = Arc::new(RoomManager::new());
        let key = RoomKey::new(Uuid::new_v4(), None);

        for _ in 0..200 {
            let leaving = Uuid::new_v4();
            let _old = manager.join(key, leaving).await;

            let joiner = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.join(key, Uuid::new_v4()).await })
            };
            let leaver = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.leave(&key, &leaving).await })
            };
            let (_, mut inbox) = joiner.await.unwrap();
            leaver.await.unwrap();

            // Whoever joins next lands in the joiner's room and reaches it.
            let (room, _rx) = manager.join(key, Uuid::new_v4()).await;
            assert_eq!(room.member_count().await, 2);
            room.publish(binary(&[7]), None).await;
            assert_eq!(inbox.try_recv().unwrap(), binary(&[7]));

            drop(room);
            manager.terminate_document(key.doc_id).await;
        }
    }

    #[tokio::test]
    async fn test_terminate_document() {
        let manager = RoomManager::new();
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (_, mut rx1) = manager.join(RoomKey::new(doc, Some(1)), Uuid::new_v4()).await;
        let (_, mut rx2) = manager.join(RoomKey::new(doc, None), Uuid::new_v4()).await;
        let (_, mut rx3) = manager.join(RoomKey::new(other, None), Uuid::new_v4()).await;

        assert_eq!(manager.terminate_document(doc).await, 2);
        assert_eq!(rx1.recv().await, Some(Outbound::Terminate));
        assert_eq!(rx2.recv().await, Some(Outbound::Terminate));
        assert!(rx3.try_recv().is_err());
        assert_eq!(manager.room_count().await, 1);
    }
}
