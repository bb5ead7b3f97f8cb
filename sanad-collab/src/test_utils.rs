//! Shared helpers for unit tests.

use std::sync::Arc;
use tempfile::TempDir;
use yrs::{Doc, GetString, ReadTxn, Text, Transact, WriteTxn};

use crate::storage::{DocumentStore, StoreConfig};

/// A store in a fresh temporary directory. Keep the `TempDir` alive.
pub fn open_store() -> (TempDir, Arc<DocumentStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DocumentStore::open(StoreConfig::for_testing(dir.path().join("db")))
        .expect("open store");
    (dir, Arc::new(store))
}

/// Append `text` to `doc`'s "content" and return the encoded delta.
pub fn edit(doc: &Doc, text: &str) -> Vec<u8> {
    let before = doc.transact().state_vector();
    {
        let mut txn = doc.transact_mut();
        let content = txn.get_or_insert_text("content");
        let len = content.get_string(&txn).len() as u32;
        content.insert(&mut txn, len, text);
    }
    doc.transact().encode_diff_v1(&before)
}

/// Current "content" text of a document.
pub fn content(doc: &Doc) -> String {
    let mut txn = doc.transact_mut();
    let text = txn.get_or_insert_text("content");
    text.get_string(&txn)
}

/// Remove `len` characters of "content" starting at `from`; returns the delta.
pub fn erase(doc: &Doc, from: u32, len: u32) -> Vec<u8> {
    let before = doc.transact().state_vector();
    {
        let mut txn = doc.transact_mut();
        let content = txn.get_or_insert_text("content");
        content.remove_range(&mut txn, from, len);
    }
    doc.transact().encode_diff_v1(&before)
}
