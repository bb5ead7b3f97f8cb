//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents`: Document rows (bincode), keyed by doc_id
//! - `links`:     Link token → doc_id index (uniqueness)
//! - `updates`:   Update log (LZ4-compressed bincode), keyed by
//!                 `doc_id:16 | page:8 | created_at:8 | record_id:16`
//! - `raw`:       Keys of `updates` rows not yet compacted (empty values)
//! - `access`:    Access entries, keyed by `doc_id:16 | user_id:16`
//! - `presence`:  Presence rows, keyed by `doc_id:16 | user_id:16 | connection_id:16`
//!
//! Key order within `updates` is (document, page, creation time), so a
//! prefix scan yields a page's log already in replay order.
//!
//! Every multi-row mutation goes through a single `WriteBatch`, which is the
//! transaction boundary for document creation, cascade deletion, batched
//! permission grants and compaction (create + delete).
//!
//! Writes that hang off a document (updates, access, presence, compaction)
//! check that it exists while holding the shared side of `lifecycle`; the
//! delete cascade holds the exclusive side, so nothing is written for a
//! document after its cascade.

use chrono::{DateTime, Utc};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    self, AccessEntry, AccessLevel, Document, LinkToken, NewDocument, Page, PresenceRecord,
    UpdateRecord, UserId,
};

/// Column family names.
const CF_DOCUMENTS: &str = "documents";
const CF_LINKS: &str = "links";
const CF_UPDATES: &str = "updates";
const CF_ACCESS: &str = "access";
const CF_PRESENCE: &str = "presence";
const CF_RAW: &str = "raw";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] =
    &[CF_DOCUMENTS, CF_LINKS, CF_UPDATES, CF_ACCESS, CF_PRESENCE, CF_RAW];

/// Attempts at finding a free generated link before giving up.
const LINK_ATTEMPTS: usize = 8;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sanad_data"),
            block_cache_size: 256 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(Uuid),
    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    /// Compression error
    #[error("Compression error: {0}")]
    CompressionError(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed store for documents, the update log, access entries and presence.
pub struct DocumentStore {
    /// RocksDB instance (single-threaded mode, shared through Arc)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
    /// Last issued update timestamp (micros), keeps creation order strict
    last_micros: AtomicI64,
    /// Serializes link allocation
    create_lock: Mutex<()>,
    /// Shared by dependent writes, exclusive for the delete cascade
    lifecycle: RwLock<()>,
}

impl DocumentStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            last_micros: AtomicI64::new(0),
            create_lock: Mutex::new(()),
            lifecycle: RwLock::new(()),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS | CF_LINKS => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_UPDATES => {
                // Many small appends, scanned by (doc, page) prefix.
                opts.set_max_write_buffer_number(4);
                // Payloads are already LZ4-compressed by us.
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {
                opts.set_max_write_buffer_number(2);
            }
        }

        opts
    }

    // ─── Documents ────────────────────────────────────────────────────

    /// Create a document, run the creation hook and grant the owner `Owner`.
    ///
    /// A supplied link must be free (`Conflict` otherwise). A generated link
    /// is derived from title + timestamp and re-salted on collision.
    pub fn create_document(&self, new: NewDocument) -> Result<Document, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_links = self.cf(CF_LINKS)?;
        let cf_access = self.cf(CF_ACCESS)?;

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| StoreError::DatabaseError("link allocation lock poisoned".into()))?;

        let now = model::now();
        let link = match new.link {
            Some(link) => {
                if self.db.get_cf(cf_links, link.as_str().as_bytes())?.is_some() {
                    return Err(StoreError::Conflict(format!("link '{link}' already in use")));
                }
                link
            }
            None => self.allocate_link(&new.title, now)?,
        };

        let doc = Document {
            id: Uuid::new_v4(),
            link,
            title: new.title,
            owner: Some(new.owner),
            default_access: new.default_access,
            is_public: new.is_public,
            public_permission_access: new.public_permission_access,
            created_at: now,
            updated_at: now,
        };
        let owner_entry = AccessEntry {
            user_id: new.owner,
            doc_id: doc.id,
            level: AccessLevel::Owner,
            updated_at: now,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_docs, doc.id.as_bytes(), encode(&doc)?);
        batch.put_cf(cf_links, doc.link.as_str().as_bytes(), doc.id.as_bytes());
        batch.put_cf(cf_access, access_key(doc.id, new.owner), encode(&owner_entry)?);
        self.write(batch)?;

        log::info!("Created document {} ({}) with link {}", doc.id, doc.title, doc.link);
        Ok(doc)
    }

    fn allocate_link(&self, title: &str, now: DateTime<Utc>) -> Result<LinkToken, StoreError> {
        let cf_links = self.cf(CF_LINKS)?;
        let mut seed = LinkToken::seed(title, now);
        for _ in 0..LINK_ATTEMPTS {
            let link = LinkToken::generate(&seed);
            if self.db.get_cf(cf_links, link.as_str().as_bytes())?.is_none() {
                return Ok(link);
            }
            log::debug!("Link {link} taken, re-salting");
            seed.push_str(&Uuid::new_v4().simple().to_string());
        }
        Err(StoreError::Conflict("could not allocate a unique link".into()))
    }

    /// Load a document.
    pub fn get_document(&self, doc_id: Uuid) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, doc_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(doc_id)),
        }
    }

    /// Check if a document exists.
    pub fn document_exists(&self, doc_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self.db.get_cf(cf, doc_id.as_bytes())?.is_some())
    }

    /// Resolve a shareable link to its document.
    pub fn document_by_link(&self, link: &LinkToken) -> Result<Document, StoreError> {
        let cf = self.cf(CF_LINKS)?;
        let id_bytes = self
            .db
            .get_cf(cf, link.as_str().as_bytes())?
            .ok_or(StoreError::NotFound(Uuid::nil()))?;
        let doc_id = uuid_from_slice(&id_bytes)?;
        self.get_document(doc_id)
    }

    /// List all document IDs in the store.
    pub fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(uuid_from_slice(&key)?);
        }
        Ok(ids)
    }

    /// Delete a document and everything it owns in one batch.
    pub fn delete_document(&self, doc_id: Uuid) -> Result<(), StoreError> {
        let _exclusive = self
            .lifecycle
            .write()
            .map_err(|_| StoreError::DatabaseError("lifecycle lock poisoned".into()))?;
        let doc = self.get_document(doc_id)?;
        let prefix = doc_id.as_bytes();

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_DOCUMENTS)?, prefix);
        batch.delete_cf(self.cf(CF_LINKS)?, doc.link.as_str().as_bytes());
        for name in [CF_UPDATES, CF_RAW, CF_ACCESS, CF_PRESENCE] {
            let cf = self.cf(name)?;
            for key in self.keys_with_prefix(name, prefix)? {
                batch.delete_cf(cf, &key);
            }
        }
        self.write(batch)?;

        log::info!("Deleted document {doc_id} and its records");
        Ok(())
    }

    // ─── Update log ───────────────────────────────────────────────────

    /// Append a raw delta. Write permission is the caller's concern.
    pub fn append_update(
        &self,
        doc_id: Uuid,
        page: Page,
        author: Option<UserId>,
        delta: &[u8],
    ) -> Result<UpdateRecord, StoreError> {
        let record = UpdateRecord::raw(doc_id, page, author, delta.to_vec(), self.next_timestamp());
        self.put_update(&record)?;
        Ok(record)
    }

    /// Insert a record with its own timestamp (imports, replays, tests).
    pub fn put_update(&self, record: &UpdateRecord) -> Result<(), StoreError> {
        let _live = self.live(record.doc_id)?;
        let key = update_key(record);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_UPDATES)?, &key, encode_compressed(record)?);
        if record.is_raw() {
            batch.put_cf(self.cf(CF_RAW)?, &key, b"");
        }
        self.write(batch)
    }

    /// Records of (doc, page) created strictly after `after`, in creation order.
    pub fn stream_since(
        &self,
        doc_id: Uuid,
        page: Page,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpdateRecord>, StoreError> {
        let prefix = page_prefix(doc_id, page);
        let mut records = self.scan_updates(&prefix)?;
        if let Some(after) = after {
            records.retain(|r| r.created_at > after);
        }
        Ok(records)
    }

    /// Records of (doc, page) created strictly before `before`, in creation order.
    pub fn stream_before(
        &self,
        doc_id: Uuid,
        page: Page,
        before: DateTime<Utc>,
    ) -> Result<Vec<UpdateRecord>, StoreError> {
        let prefix = page_prefix(doc_id, page);
        let mut start = prefix.clone();
        start.extend_from_slice(&[0u8; 8]);
        let end = time_bound(&prefix, before);

        let cf = self.cf(CF_UPDATES)?;
        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || key.as_ref() >= end.as_slice() {
                break;
            }
            records.push(decode_compressed(&value)?);
        }
        Ok(records)
    }

    /// Every raw (uncompacted, unprocessed) record, ordered by document,
    /// page and creation time. Reads only the `raw` index, never compacted
    /// history.
    pub fn raw_updates(&self) -> Result<Vec<UpdateRecord>, StoreError> {
        let cf_raw = self.cf(CF_RAW)?;
        let cf_updates = self.cf(CF_UPDATES)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf_raw, IteratorMode::Start) {
            let (key, _) = item?;
            match self.db.get_cf(cf_updates, &key)? {
                Some(value) => {
                    let record: UpdateRecord = decode_compressed(&value)?;
                    if record.is_raw() {
                        records.push(record);
                    }
                }
                None => log::warn!("Raw index entry without an update row, skipping"),
            }
        }
        Ok(records)
    }

    /// Number of records in a page's log.
    pub fn update_count(&self, doc_id: Uuid, page: Page) -> Result<usize, StoreError> {
        Ok(self.keys_with_prefix(CF_UPDATES, &page_prefix(doc_id, page))?.len())
    }

    /// Replace `consumed` by `compacted` atomically.
    ///
    /// Either both the new record and the deletions become visible or
    /// neither does.
    pub fn commit_compaction(
        &self,
        compacted: &UpdateRecord,
        consumed: &[UpdateRecord],
    ) -> Result<(), StoreError> {
        let _live = self.live(compacted.doc_id)?;
        let cf = self.cf(CF_UPDATES)?;
        let cf_raw = self.cf(CF_RAW)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, update_key(compacted), encode_compressed(compacted)?);
        for record in consumed {
            let key = update_key(record);
            batch.delete_cf(cf, &key);
            batch.delete_cf(cf_raw, &key);
        }
        self.write(batch)
    }

    fn scan_updates(&self, prefix: &[u8]) -> Result<Vec<UpdateRecord>, StoreError> {
        let cf = self.cf(CF_UPDATES)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            records.push(decode_compressed(&value)?);
        }
        Ok(records)
    }

    /// Strictly increasing timestamps, so creation order is total.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = model::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_micros
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return DateTime::<Utc>::from_timestamp_micros(next).unwrap_or_else(model::now),
                Err(actual) => prev = actual,
            }
        }
    }

    // ─── Access entries ───────────────────────────────────────────────

    /// Explicit entry for (doc, user), if any.
    pub fn get_access(&self, doc_id: Uuid, user: UserId) -> Result<Option<AccessEntry>, StoreError> {
        let cf = self.cf(CF_ACCESS)?;
        match self.db.get_cf(cf, access_key(doc_id, user))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Upsert one entry.
    pub fn put_access(&self, entry: &AccessEntry) -> Result<(), StoreError> {
        self.put_access_batch(std::slice::from_ref(entry))
    }

    /// Upsert several entries atomically.
    pub fn put_access_batch(&self, entries: &[AccessEntry]) -> Result<(), StoreError> {
        let _shared = self.shared()?;
        for entry in entries {
            self.ensure_document(entry.doc_id)?;
        }
        let cf = self.cf(CF_ACCESS)?;
        let mut batch = WriteBatch::default();
        for entry in entries {
            batch.put_cf(cf, access_key(entry.doc_id, entry.user_id), encode(entry)?);
        }
        self.write(batch)
    }

    /// All explicit entries of a document.
    pub fn list_access(&self, doc_id: Uuid) -> Result<Vec<AccessEntry>, StoreError> {
        self.scan_values(CF_ACCESS, doc_id.as_bytes())
    }

    // ─── Presence ─────────────────────────────────────────────────────

    /// Record a new connection lifetime.
    pub fn open_presence(
        &self,
        doc_id: Uuid,
        user: UserId,
        connection_id: Uuid,
    ) -> Result<PresenceRecord, StoreError> {
        let now = model::now();
        let record = PresenceRecord {
            doc_id,
            user_id: user,
            connection_id,
            viewed_at: now,
            last_active: now,
        };
        let _live = self.live(doc_id)?;
        self.put_presence(&record)?;
        Ok(record)
    }

    /// Bump `last_active`, creating the row first if it is missing.
    pub fn touch_presence(
        &self,
        doc_id: Uuid,
        user: UserId,
        connection_id: Uuid,
    ) -> Result<PresenceRecord, StoreError> {
        let _live = self.live(doc_id)?;
        let cf = self.cf(CF_PRESENCE)?;
        let now = model::now();
        let record = match self.db.get_cf(cf, presence_key(doc_id, user, connection_id))? {
            Some(bytes) => {
                let mut record: PresenceRecord = decode(&bytes)?;
                record.last_active = now;
                record
            }
            None => PresenceRecord {
                doc_id,
                user_id: user,
                connection_id,
                viewed_at: now,
                last_active: now,
            },
        };
        self.put_presence(&record)?;
        Ok(record)
    }

    /// All presence rows of a document.
    pub fn list_presence(&self, doc_id: Uuid) -> Result<Vec<PresenceRecord>, StoreError> {
        self.scan_values(CF_PRESENCE, doc_id.as_bytes())
    }

    fn put_presence(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_PRESENCE)?;
        let key = presence_key(record.doc_id, record.user_id, record.connection_id);
        self.db.put_cf(cf, key, encode(record)?)?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn shared(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        self.lifecycle
            .read()
            .map_err(|_| StoreError::DatabaseError("lifecycle lock poisoned".into()))
    }

    fn ensure_document(&self, doc_id: Uuid) -> Result<(), StoreError> {
        if self.document_exists(doc_id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(doc_id))
        }
    }

    /// Shared lifecycle guard, taken only if `doc_id` still exists.
    fn live(&self, doc_id: Uuid) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        let guard = self.shared()?;
        self.ensure_document(doc_id)?;
        Ok(guard)
    }

    /// Force a flush of memtables.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn keys_with_prefix(&self, name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>, StoreError> {
        let cf = self.cf(name)?;
        let mut keys = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn scan_values<T: DeserializeOwned>(
        &self,
        name: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(name)?;
        let mut values = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }
}

// ─── Key & value encoding ─────────────────────────────────────────────

fn page_prefix(doc_id: Uuid, page: Page) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.extend_from_slice(doc_id.as_bytes());
    key.extend_from_slice(&page.map_or(0u64, |p| p as u64 + 1).to_be_bytes());
    key
}

/// Sign-flipped so byte order matches numeric order.
fn time_bytes(at: DateTime<Utc>) -> [u8; 8] {
    ((at.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

fn time_bound(prefix: &[u8], at: DateTime<Utc>) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&time_bytes(at));
    key
}

fn update_key(record: &UpdateRecord) -> Vec<u8> {
    let mut key = time_bound(&page_prefix(record.doc_id, record.page), record.created_at);
    key.extend_from_slice(record.id.as_bytes());
    key
}

fn access_key(doc_id: Uuid, user: UserId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(doc_id.as_bytes());
    key.extend_from_slice(user.as_bytes());
    key
}

fn presence_key(doc_id: Uuid, user: UserId, connection_id: Uuid) -> Vec<u8> {
    let mut key = access_key(doc_id, user);
    key.extend_from_slice(connection_id.as_bytes());
    key
}

fn uuid_from_slice(bytes: &[u8]) -> Result<Uuid, StoreError> {
    Uuid::from_slice(bytes).map_err(|e| StoreError::DeserializationError(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

fn encode_compressed<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(lz4_flex::compress_prepend_size(&encode(value)?))
}

fn decode_compressed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    decode(&raw)
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
