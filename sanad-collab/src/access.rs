//! Access control resolution and the permission-setting write path.
//!
//! Levels are ordered `Deny < ReadOnly < Writer < Admin < Owner`. The
//! document owner always resolves to `Owner`; explicit entries are
//! materialized lazily (owner on any check, default level on mutation).

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::model::{self, AccessEntry, AccessLevel, Document, UserId};
use crate::services::{Notifier, PermissionNotice};
use crate::storage::DocumentStore;

/// Result of the effective-permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectivePermission {
    pub level: AccessLevel,
    pub can_write: bool,
}

/// One requested (user, level) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub user: UserId,
    pub level: AccessLevel,
}

impl Grant {
    pub fn new(user: UserId, level: AccessLevel) -> Self {
        Self { user, level }
    }
}

/// Per-entry result of [`AccessResolver::set_permissions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    pub user: UserId,
    pub level: AccessLevel,
    pub notified: bool,
    /// Why the notification failed, if it did.
    pub notify_error: Option<String>,
}

pub struct AccessResolver {
    store: Arc<DocumentStore>,
}

impl AccessResolver {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Effective level of `user` on `doc_id`. Pure read except for the
    /// owner's entry, which is upserted.
    pub fn resolve(&self, user: UserId, doc_id: Uuid) -> SyncResult<AccessLevel> {
        let doc = self.store.get_document(doc_id)?;
        self.resolve_in(&doc, user, false)
    }

    /// Like [`AccessResolver::resolve`], also materializing the default
    /// level as an explicit entry.
    pub fn resolve_for_mutation(&self, user: UserId, doc_id: Uuid) -> SyncResult<AccessLevel> {
        let doc = self.store.get_document(doc_id)?;
        self.resolve_in(&doc, user, true)
    }

    fn resolve_in(&self, doc: &Document, user: UserId, materialize: bool) -> SyncResult<AccessLevel> {
        let existing = self.store.get_access(doc.id, user)?;

        if doc.is_owner(user) {
            if existing.map(|e| e.level) != Some(AccessLevel::Owner) {
                self.store.put_access(&entry(doc.id, user, AccessLevel::Owner))?;
                log::debug!("Materialized owner entry for {user} on {}", doc.id);
            }
            return Ok(AccessLevel::Owner);
        }

        if let Some(existing) = existing {
            return Ok(existing.level);
        }

        if materialize {
            self.store.put_access(&entry(doc.id, user, doc.default_access))?;
        }
        Ok(doc.default_access)
    }

    pub fn effective_permission(
        &self,
        user: UserId,
        doc_id: Uuid,
    ) -> SyncResult<EffectivePermission> {
        let level = self.resolve(user, doc_id)?;
        Ok(EffectivePermission {
            level,
            can_write: level.can_write(),
        })
    }

    /// Owner, Admin and above, or anyone when the document allows public
    /// permission access.
    pub fn can_set_permissions(&self, changer: UserId, doc_id: Uuid) -> SyncResult<bool> {
        let doc = self.store.get_document(doc_id)?;
        self.can_set_in(&doc, changer)
    }

    fn can_set_in(&self, doc: &Document, changer: UserId) -> SyncResult<bool> {
        if doc.is_owner(changer) || doc.public_permission_access {
            return Ok(true);
        }
        Ok(self.resolve_in(doc, changer, false)? >= AccessLevel::Admin)
    }

    /// Set one user's level on a document.
    pub fn set_permission(
        &self,
        changer: UserId,
        doc_id: Uuid,
        target: UserId,
        level: AccessLevel,
    ) -> SyncResult<AccessEntry> {
        let doc = self.store.get_document(doc_id)?;
        let entry = self.validate(&doc, changer, Grant::new(target, level))?;
        self.store.put_access(&entry)?;
        log::info!("{changer} set {target} to {level} on {doc_id}");
        Ok(entry)
    }

    /// Apply a batch of grants.
    ///
    /// Every grant is validated before anything is written; one rejection
    /// fails the whole batch. Accepted grants are committed atomically.
    /// Notifications, when requested, are sent afterwards and their failure
    /// is reported per entry without undoing any grant.
    pub async fn set_permissions(
        &self,
        changer: UserId,
        doc_id: Uuid,
        grants: &[Grant],
        notify: Option<(&dyn Notifier, Option<String>)>,
    ) -> SyncResult<Vec<GrantOutcome>> {
        let doc = self.store.get_document(doc_id)?;
        let entries = grants
            .iter()
            .map(|grant| self.validate(&doc, changer, *grant))
            .collect::<SyncResult<Vec<_>>>()?;
        self.store.put_access_batch(&entries)?;
        log::info!("{changer} set {} permissions on {doc_id}", entries.len());

        let mut outcomes = Vec::with_capacity(entries.len());
        for e in &entries {
            let mut outcome = GrantOutcome {
                user: e.user_id,
                level: e.level,
                notified: false,
                notify_error: None,
            };
            if let Some((notifier, message)) = &notify {
                let notice = PermissionNotice {
                    doc_id,
                    doc_title: doc.title.clone(),
                    recipient: e.user_id,
                    level: e.level,
                    message: message.clone(),
                };
                match notifier.notify(&notice).await {
                    Ok(()) => outcome.notified = true,
                    Err(err) => {
                        log::warn!("Notification to {} about {doc_id} failed: {err}", e.user_id);
                        outcome.notify_error = Some(err.to_string());
                    }
                }
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn validate(&self, doc: &Document, changer: UserId, grant: Grant) -> SyncResult<AccessEntry> {
        if !self.can_set_in(doc, changer)? {
            return Err(SyncError::denied("not allowed to change permissions"));
        }

        let changer_level = self.resolve_in(doc, changer, true)?;
        if changer_level != AccessLevel::Owner && grant.level > changer_level {
            return Err(SyncError::denied(format!(
                "cannot grant {} with level {changer_level}",
                grant.level
            )));
        }

        if doc.is_owner(grant.user) && grant.level != AccessLevel::Owner && !doc.is_owner(changer)
        {
            return Err(SyncError::denied("owner level can only be changed by the owner"));
        }

        Ok(entry(doc.id, grant.user, grant.level))
    }

    /// All explicit entries, highest level first.
    pub fn list_permissions(&self, requester: UserId, doc_id: Uuid) -> SyncResult<Vec<AccessEntry>> {
        let doc = self.store.get_document(doc_id)?;
        if !self.can_set_in(&doc, requester)? {
            return Err(SyncError::denied("not allowed to list permissions"));
        }
        let mut entries = self.store.list_access(doc_id)?;
        entries.sort_by(|a, b| b.level.cmp(&a.level));
        Ok(entries)
    }
}

fn entry(doc_id: Uuid, user_id: UserId, level: AccessLevel) -> AccessEntry {
    AccessEntry {
        user_id,
        doc_id,
        level,
        updated_at: model::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDocument;
    use crate::storage::StoreConfig;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<DocumentStore>,
        access: AccessResolver,
        owner: UserId,
        doc: Document,
    }

    fn fixture(new: impl FnOnce(UserId) -> NewDocument) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
        let owner = Uuid::new_v4();
        let doc = store.create_document(new(owner)).unwrap();
        Fixture {
            _dir: dir,
            access: AccessResolver::new(store.clone()),
            store,
            owner,
            doc,
        }
    }

    fn plain() -> Fixture {
        fixture(|owner| NewDocument::new("Plan", owner).default_access(AccessLevel::ReadOnly))
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notice: &PermissionNotice) -> SyncResult<()> {
            Err(SyncError::TransientDependencyFailure("smtp down".into()))
        }
    }

    #[test]
    fn test_owner_resolves_to_owner_without_entry() {
        let f = plain();
        f.store.put_access(&entry(f.doc.id, f.owner, AccessLevel::ReadOnly)).unwrap();

        assert_eq!(f.access.resolve(f.owner, f.doc.id).unwrap(), AccessLevel::Owner);
        let stored = f.store.get_access(f.doc.id, f.owner).unwrap().unwrap();
        assert_eq!(stored.level, AccessLevel::Owner);
    }

    #[test]
    fn test_default_level_and_materialization() {
        let f = plain();
        let stranger = Uuid::new_v4();

        assert_eq!(f.access.resolve(stranger, f.doc.id).unwrap(), AccessLevel::ReadOnly);
        assert!(f.store.get_access(f.doc.id, stranger).unwrap().is_none());

        f.access.resolve_for_mutation(stranger, f.doc.id).unwrap();
        assert!(f.store.get_access(f.doc.id, stranger).unwrap().is_some());
    }

    #[test]
    fn test_resolve_unknown_document() {
        let f = plain();
        let err = f.access.resolve(f.owner, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn test_effective_permission() {
        let f = plain();
        let writer = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, writer, AccessLevel::Writer).unwrap();

        let p = f.access.effective_permission(writer, f.doc.id).unwrap();
        assert_eq!(p, EffectivePermission { level: AccessLevel::Writer, can_write: true });
        let p = f.access.effective_permission(Uuid::new_v4(), f.doc.id).unwrap();
        assert!(!p.can_write);
    }

    #[test]
    fn test_can_set_permissions() {
        let f = plain();
        let admin = Uuid::new_v4();
        let writer = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, admin, AccessLevel::Admin).unwrap();
        f.access.set_permission(f.owner, f.doc.id, writer, AccessLevel::Writer).unwrap();

        assert!(f.access.can_set_permissions(f.owner, f.doc.id).unwrap());
        assert!(f.access.can_set_permissions(admin, f.doc.id).unwrap());
        assert!(!f.access.can_set_permissions(writer, f.doc.id).unwrap());

        let open = fixture(|owner| NewDocument::new("Open", owner).public_permission_access(true));
        assert!(open.access.can_set_permissions(Uuid::new_v4(), open.doc.id).unwrap());
    }

    #[test]
    fn test_cannot_grant_above_own_level() {
        let f = fixture(|owner| NewDocument::new("Open", owner).public_permission_access(true));
        let writer = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, writer, AccessLevel::Writer).unwrap();

        let target = Uuid::new_v4();
        assert!(f.access.set_permission(writer, f.doc.id, target, AccessLevel::Writer).is_ok());
        let err = f
            .access
            .set_permission(writer, f.doc.id, target, AccessLevel::Admin)
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[test]
    fn test_owner_level_is_immutable_except_by_owner() {
        let f = plain();
        let admin = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, admin, AccessLevel::Admin).unwrap();

        let err = f
            .access
            .set_permission(admin, f.doc.id, f.owner, AccessLevel::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
        assert_eq!(f.access.resolve(f.owner, f.doc.id).unwrap(), AccessLevel::Owner);

        assert!(f.access.set_permission(f.owner, f.doc.id, f.owner, AccessLevel::Admin).is_ok());
    }

    #[test]
    fn test_writer_cannot_set_permissions() {
        let f = plain();
        let writer = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, writer, AccessLevel::Writer).unwrap();

        let err = f
            .access
            .set_permission(writer, f.doc.id, Uuid::new_v4(), AccessLevel::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let f = plain();
        let admin = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, admin, AccessLevel::Admin).unwrap();

        let ok_user = Uuid::new_v4();
        let grants = [
            Grant::new(ok_user, AccessLevel::Writer),
            Grant::new(f.owner, AccessLevel::Writer),
        ];
        let err = f.access.set_permissions(admin, f.doc.id, &grants, None).await.unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
        assert!(f.store.get_access(f.doc.id, ok_user).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_grants() {
        let f = plain();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let grants = [Grant::new(a, AccessLevel::Writer), Grant::new(b, AccessLevel::ReadOnly)];

        let notifier: &dyn Notifier = &FailingNotifier;
        let outcomes = f
            .access
            .set_permissions(f.owner, f.doc.id, &grants, Some((notifier, None)))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.notified && o.notify_error.is_some()));
        assert_eq!(f.store.get_access(f.doc.id, a).unwrap().unwrap().level, AccessLevel::Writer);
        assert_eq!(f.store.get_access(f.doc.id, b).unwrap().unwrap().level, AccessLevel::ReadOnly);
    }

    #[tokio::test]
    async fn test_notification_success() {
        let f = plain();
        let notifier: &dyn Notifier = &crate::services::LogNotifier;
        let outcomes = f
            .access
            .set_permissions(
                f.owner,
                f.doc.id,
                &[Grant::new(Uuid::new_v4(), AccessLevel::Writer)],
                Some((notifier, Some("welcome".into()))),
            )
            .await
            .unwrap();
        assert!(outcomes[0].notified);
    }

    #[test]
    fn test_list_permissions_ordered_and_gated() {
        let f = plain();
        let reader = Uuid::new_v4();
        let admin = Uuid::new_v4();
        f.access.set_permission(f.owner, f.doc.id, reader, AccessLevel::ReadOnly).unwrap();
        f.access.set_permission(f.owner, f.doc.id, admin, AccessLevel::Admin).unwrap();

        let levels: Vec<AccessLevel> = f
            .access
            .list_permissions(f.owner, f.doc.id)
            .unwrap()
            .into_iter()
            .map(|e| e.level)
            .collect();
        assert_eq!(levels, vec![AccessLevel::Owner, AccessLevel::Admin, AccessLevel::ReadOnly]);

        let err = f.access.list_permissions(reader, f.doc.id).unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }
}
