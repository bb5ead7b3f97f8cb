//! Background compaction of the update log.
//!
//! Raw records of each (document, page) are split into editing sessions:
//! a gap longer than the threshold `T` between two consecutive records
//! starts a new session. A session is merged only once it is stale (its
//! last record is older than `now - T`), so a burst that is still growing
//! is left alone.
//!
//! ```text
//!  t:   0   1   2                      40        (minutes, T = 15)
//!       ●───●───●                      ●
//!       └─ stale session ─┘            └─ fresh, untouched
//!                 ▼
//!       ◆ one compacted record (authors = union)
//! ```
//!
//! Merging replays the history before the session, captures its state
//! vector, applies the session on top and keeps only the diff. The new
//! record and the deletion of the consumed ones commit in one batch.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::model::{self, Page, UpdateRecord, UserId};
use crate::replica::Replica;
use crate::storage::DocumentStore;

/// Compaction scheduling parameters.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Time between runs.
    pub interval: Duration,
    /// Session gap threshold `T`.
    pub gap_threshold: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            gap_threshold: Duration::from_secs(15 * 60),
        }
    }
}

impl CompactionConfig {
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(50),
            gap_threshold: Duration::from_secs(15 * 60),
        }
    }

    fn gap(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.gap_threshold).unwrap_or_else(|_| chrono::Duration::days(3650))
    }
}

/// Summary of one compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Sessions merged into a compacted record.
    pub sessions: usize,
    /// Raw records consumed by those sessions.
    pub consumed: usize,
    /// Raw records left alone because their session is still fresh.
    pub fresh: usize,
    /// Sessions whose merge failed; their records stay raw.
    pub failed: usize,
}

/// Split creation-ordered records into sessions.
///
/// Consecutive records belong to the same session unless they are more
/// than `gap` apart.
pub fn split_sessions(records: Vec<UpdateRecord>, gap: chrono::Duration) -> Vec<Vec<UpdateRecord>> {
    let mut sessions: Vec<Vec<UpdateRecord>> = Vec::new();
    let mut last: Option<DateTime<Utc>> = None;
    for record in records {
        let starts_new = last.is_none_or(|prev| record.created_at - prev > gap);
        last = Some(record.created_at);
        match sessions.last_mut() {
            Some(current) if !starts_new => current.push(record),
            _ => sessions.push(vec![record]),
        }
    }
    sessions
}

/// A session may be merged once its last record is older than `now - gap`.
pub fn is_stale(session: &[UpdateRecord], gap: chrono::Duration, now: DateTime<Utc>) -> bool {
    session.last().is_some_and(|last| last.created_at < now - gap)
}

/// Periodic compaction job. One pass at a time; runs never overlap.
pub struct Compactor {
    store: Arc<DocumentStore>,
    config: CompactionConfig,
    running: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Compactor {
    pub fn new(store: Arc<DocumentStore>, config: CompactionConfig) -> Self {
        Self {
            store,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact every stale session as of `now`.
    ///
    /// A failing session is logged and skipped; the others still run.
    pub fn run_once(&self, now: DateTime<Utc>) -> SyncResult<CompactionReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            log::debug!("Compaction already in progress, skipping run");
            return Ok(CompactionReport::default());
        }
        let _guard = RunGuard(&self.running);

        let gap = self.config.gap();
        let mut groups: BTreeMap<(Uuid, Page), Vec<UpdateRecord>> = BTreeMap::new();
        for record in self.store.raw_updates()? {
            groups.entry((record.doc_id, record.page)).or_default().push(record);
        }

        let mut report = CompactionReport::default();
        for ((doc_id, page), records) in groups {
            for session in split_sessions(records, gap) {
                if !is_stale(&session, gap, now) {
                    report.fresh += session.len();
                    continue;
                }
                match self.compact_session(&session, None) {
                    Ok(compacted) => {
                        report.sessions += 1;
                        report.consumed += session.len();
                        log::debug!(
                            "Compacted {} records of doc {doc_id} page {page:?} into {}",
                            session.len(),
                            compacted.id
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        log::warn!("Compaction of doc {doc_id} page {page:?} failed: {e}");
                    }
                }
            }
        }

        log::info!(
            "Compaction run: {} sessions, {} records consumed, {} fresh, {} failed",
            report.sessions,
            report.consumed,
            report.fresh,
            report.failed
        );
        Ok(report)
    }

    /// Merge one session (records of a single doc/page in creation order)
    /// into a compacted record and delete the originals atomically.
    ///
    /// The title defaults to the session's start time.
    pub fn compact_session(
        &self,
        session: &[UpdateRecord],
        title: Option<String>,
    ) -> SyncResult<UpdateRecord> {
        let first = session
            .first()
            .ok_or_else(|| SyncError::malformed("empty compaction session"))?;
        if !self.store.document_exists(first.doc_id)? {
            return Err(SyncError::NotFound(first.doc_id));
        }

        let prior = self
            .store
            .stream_before(first.doc_id, first.page, first.created_at)?;
        let mut replica = Replica::build_from(&prior);
        let before = replica.state_vector();
        replica.replay(session);
        let delta = replica.diff(&before);

        let authors: BTreeSet<UserId> = session.iter().filter_map(|r| r.author).collect();
        let title = title.unwrap_or_else(|| first.created_at.format("%Y-%m-%d %H:%M").to_string());
        let compacted = UpdateRecord::compacted(
            first.doc_id,
            first.page,
            authors,
            delta,
            first.created_at,
            title,
        );
        self.store.commit_compaction(&compacted, session)?;
        Ok(compacted)
    }

    /// Run on the configured interval until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        log::info!(
            "Starting compaction every {:?} (gap threshold {:?})",
            self.config.interval,
            self.config.gap_threshold
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let compactor = self.clone();
                match tokio::task::spawn_blocking(move || compactor.run_once(model::now())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::warn!("Compaction run failed: {e}"),
                    Err(e) => log::error!("Compaction task panicked: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDocument;
    use crate::test_utils::{content, edit, open_store};
    use chrono::TimeZone;
    use yrs::Doc;

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn raw_at(doc_id: Uuid, page: Page, author: UserId, payload: Vec<u8>, at: i64) -> UpdateRecord {
        UpdateRecord::raw(doc_id, page, Some(author), payload, base() + minutes(at))
    }

    #[test]
    fn test_split_sessions_by_gap() {
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();
        let records: Vec<UpdateRecord> = [0, 1, 2, 17, 40, 55]
            .into_iter()
            .map(|m| raw_at(doc, None, user, vec![], m))
            .collect();

        let sizes: Vec<usize> = split_sessions(records, minutes(15)).iter().map(Vec::len).collect();
        // 2 -> 17 is exactly T (same session); 17 -> 40 exceeds it.
        assert_eq!(sizes, vec![4, 2]);
        assert!(split_sessions(Vec::new(), minutes(15)).is_empty());
    }

    #[test]
    fn test_is_stale() {
        let doc = Uuid::new_v4();
        let session = vec![raw_at(doc, None, Uuid::new_v4(), vec![], 2)];
        assert!(is_stale(&session, minutes(15), base() + minutes(18)));
        assert!(!is_stale(&session, minutes(15), base() + minutes(17)));
        assert!(!is_stale(&[], minutes(15), base()));
    }

    #[test]
    fn test_stale_session_compacted_fresh_left_alone() {
        let (_dir, store) = open_store();
        let doc = store
            .create_document(NewDocument::new("Minutes", Uuid::new_v4()))
            .unwrap();
        let authors = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let source = Doc::new();

        let mut originals = Vec::new();
        for (i, at) in [0, 1, 2].into_iter().enumerate() {
            let record = raw_at(doc.id, Some(1), authors[i], edit(&source, "ab"), at);
            store.put_update(&record).unwrap();
            originals.push(record);
        }
        let late = raw_at(doc.id, Some(1), authors[0], edit(&source, "cd"), 40);
        store.put_update(&late).unwrap();
        originals.push(late.clone());

        let compactor = Compactor::new(store.clone(), CompactionConfig::for_testing());
        let report = compactor.run_once(base() + minutes(41)).unwrap();
        assert_eq!(
            report,
            CompactionReport { sessions: 1, consumed: 3, fresh: 1, failed: 0 }
        );

        let log = store.stream_since(doc.id, Some(1), None).unwrap();
        assert_eq!(log.len(), 2);
        let compacted = &log[0];
        assert!(compacted.compacted && compacted.processed);
        assert_eq!(compacted.created_at, base());
        assert_eq!(compacted.title.as_deref(), Some("2024-03-01 09:00"));
        let expected: BTreeSet<UserId> = authors.into_iter().collect();
        assert_eq!(compacted.authors.as_ref(), Some(&expected));
        assert_eq!(log[1], late);

        // Same state as the uncompacted log.
        let before = Replica::build_from(&originals);
        let after = Replica::build_from(&log);
        assert_eq!(before.state_vector(), after.state_vector());
        assert_eq!(content(after.doc()), "abababcd");
    }

    #[test]
    fn test_later_sessions_diff_against_compacted_history() {
        let (_dir, store) = open_store();
        let doc = store
            .create_document(NewDocument::new("Log", Uuid::new_v4()))
            .unwrap();
        let user = Uuid::new_v4();
        let source = Doc::new();

        let mut originals = Vec::new();
        for (at, text) in [(0, "one "), (1, "two "), (30, "three "), (31, "four")] {
            let record = raw_at(doc.id, None, user, edit(&source, text), at);
            store.put_update(&record).unwrap();
            originals.push(record);
        }

        let compactor = Compactor::new(store.clone(), CompactionConfig::for_testing());
        let report = compactor.run_once(base() + minutes(60)).unwrap();
        assert_eq!(report.sessions, 2);
        assert_eq!(report.consumed, 4);

        let log = store.stream_since(doc.id, None, None).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|r| r.compacted));

        let replayed = Replica::build_from(&log);
        assert_eq!(
            replayed.state_vector(),
            Replica::build_from(&originals).state_vector()
        );
        assert_eq!(content(replayed.doc()), "one two three four");

        // Nothing raw remains, so a second pass is a no-op.
        let again = compactor.run_once(base() + minutes(120)).unwrap();
        assert_eq!(again, CompactionReport::default());
    }

    #[test]
    fn test_pages_are_compacted_independently() {
        let (_dir, store) = open_store();
        let doc = store
            .create_document(NewDocument::new("Book", Uuid::new_v4()))
            .unwrap();
        let user = Uuid::new_v4();
        let page_one = Doc::new();
        let page_two = Doc::new();

        store.put_update(&raw_at(doc.id, Some(1), user, edit(&page_one, "a"), 0)).unwrap();
        store.put_update(&raw_at(doc.id, Some(2), user, edit(&page_two, "b"), 50)).unwrap();

        let compactor = Compactor::new(store.clone(), CompactionConfig::for_testing());
        let report = compactor.run_once(base() + minutes(55)).unwrap();
        assert_eq!(report.sessions, 1);
        assert_eq!(report.fresh, 1);

        assert!(store.stream_since(doc.id, Some(1), None).unwrap()[0].compacted);
        assert!(store.stream_since(doc.id, Some(2), None).unwrap()[0].is_raw());
    }

    #[test]
    fn test_empty_session_rejected() {
        let (_dir, store) = open_store();
        let compactor = Compactor::new(store, CompactionConfig::for_testing());
        assert!(matches!(
            compactor.compact_session(&[], None),
            Err(SyncError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_spawned_job_compacts() {
        let (_dir, store) = open_store();
        let doc = store
            .create_document(NewDocument::new("Bg", Uuid::new_v4()))
            .unwrap();
        let old = model::now() - chrono::Duration::hours(2);
        let record = UpdateRecord::raw(doc.id, None, None, edit(&Doc::new(), "x"), old);
        store.put_update(&record).unwrap();

        let handle = Arc::new(Compactor::new(store.clone(), CompactionConfig::for_testing())).spawn();
        let mut compacted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.raw_updates().unwrap().is_empty() {
                compacted = true;
                break;
            }
        }
        handle.abort();
        assert!(compacted);
        assert_eq!(store.update_count(doc.id, None).unwrap(), 1);
    }
}
