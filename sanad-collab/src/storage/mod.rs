//! Persistent storage layer for collaborative documents.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  append / stream  ┌──────────────┐
//! │ SyncSession │ ────────────────► │ DocumentStore│
//! └─────────────┘                   │ (RocksDB)    │
//! ┌─────────────┐  raw scan +       └──────┬───────┘
//! │ Compactor   │  atomic swap             │ column families
//! └─────────────┘ ───────────────►         ▼
//!                     ┌──────────────────────────────────────┐
//!                     │ CF "documents"  document rows        │
//!                     │ CF "links"      link token index     │
//!                     │ CF "updates"    append-only delta log│
//!                     │ CF "access"     permission entries   │
//!                     │ CF "presence"   last-seen rows       │
//!                     └──────────────────────────────────────┘
//! ```
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 3

pub mod rocks;

pub use rocks::{DocumentStore, StoreConfig, StoreError};
