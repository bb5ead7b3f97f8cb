//! In-memory CRDT replica rebuilt from the update log.
//!
//! Each session owns exactly one replica for the lifetime of its
//! connection; replicas are never shared. The log is the source of truth,
//! convergence comes from the CRDT merge.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::error::{SyncError, SyncResult};
use crate::model::UpdateRecord;

/// A private Yrs document plus replay bookkeeping.
pub struct Replica {
    doc: Doc,
    applied: usize,
    skipped: usize,
}

impl Replica {
    pub fn new() -> Self {
        Self {
            doc: Doc::new(),
            applied: 0,
            skipped: 0,
        }
    }

    /// Replay records in the order given (creation order).
    ///
    /// A malformed record is logged and skipped; it never aborts the replay.
    pub fn build_from<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a UpdateRecord>,
    {
        let mut replica = Self::new();
        replica.replay(records);
        replica
    }

    /// Apply further records on top of the current state, skipping
    /// malformed ones.
    pub fn replay<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a UpdateRecord>,
    {
        for record in records {
            if let Err(e) = self.apply(&record.payload) {
                self.skipped += 1;
                log::warn!(
                    "Skipping update {} of doc {} during replay: {e}",
                    record.id,
                    record.doc_id
                );
            }
        }
    }

    /// Apply one encoded (v1) delta.
    pub fn apply(&mut self, delta: &[u8]) -> SyncResult<()> {
        let update = Update::decode_v1(delta).map_err(SyncError::malformed)?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update).map_err(SyncError::malformed)?;
        self.applied += 1;
        Ok(())
    }

    /// Whether `delta` carries anything this replica lacks: blocks past its
    /// state vector or deletions it has not applied yet.
    ///
    /// A peer's sync step 2 usually repeats what the replica already holds
    /// (always its delete set); such a delta is not a write.
    pub fn is_new(&self, delta: &[u8]) -> SyncResult<bool> {
        let update = Update::decode_v1(delta).map_err(SyncError::malformed)?;
        let known = self.state_vector();

        let inserted = update.insertions(true);
        for (client, _) in update.state_vector_lower().iter() {
            let clock = known.get(client);
            if let Some(ranges) = inserted.get(client) {
                if ranges.iter().any(|r| r.end > clock) {
                    return Ok(true);
                }
            }
        }

        if update.delete_set().is_empty() {
            return Ok(false);
        }
        let mut deleted = self.doc.transact().snapshot().delete_set;
        deleted.squash();
        for (client, ranges) in update.delete_set().iter() {
            for r in ranges.iter().filter(|r| r.start < r.end) {
                let covered = deleted
                    .range(client)
                    .is_some_and(|have| have.iter().any(|h| h.start <= r.start && r.end <= h.end));
                if !covered {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    pub fn encoded_state_vector(&self) -> Vec<u8> {
        self.state_vector().encode_v1()
    }

    /// Minimal delta covering everything not in `since`.
    pub fn diff(&self, since: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_diff_v1(since)
    }

    /// [`Replica::diff`] against a peer's encoded state vector.
    pub fn diff_encoded(&self, state_vector: &[u8]) -> SyncResult<Vec<u8>> {
        let since = StateVector::decode_v1(state_vector).map_err(SyncError::malformed)?;
        Ok(self.diff(&since))
    }

    /// Full state as one update.
    pub fn encode_state(&self) -> Vec<u8> {
        self.diff(&StateVector::default())
    }

    /// Deltas applied successfully.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Deltas skipped as malformed during replay.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}
