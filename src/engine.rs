//! Engine Module
//!
//! The engine context that ties the index, the worker pool, the bio queue
//! and the disk together.
//!
//! ## Responsibilities
//! - Apply requests to the index synchronously
//! - Queue one write-back job per mutation
//! - Load the persisted state on open, drain and dump on exit
//!
//! ## Lock Order
//! index lock → rebase set → bio queue → disk state. Mutations enqueue their
//! job while still holding the index write lock, so queue order equals
//! mutation order.
//!
//! ## Write-back Records
//! Strings are written back whole. List mutations are written back as deltas
//! (push, set or remove at resolved positions) against the record already on
//! disk. After a disk clear there is no such record, so each key's first
//! list mutation writes the whole list and later ones go back to deltas.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::bg::BgPool;
use crate::bio::{Bio, BioStatsSnapshot, WriteOp};
use crate::config::Config;
use crate::disk::{Disk, DumpStats};
use crate::error::{EmberError, Result};
use crate::hash::{self, BuildKeyHasher};
use crate::index::{InvariantViolation, RbTree};
use crate::request::{now_millis, Operation, Request, Response};
use crate::value::{ListEnd, ListValue, Selection, SetOutcome, Value};

/// Point-in-time engine counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Keys in the index
    pub keys: usize,

    /// Jobs waiting in the bio queue
    pub pending_jobs: usize,

    /// Write-back counters
    pub bio: BioStatsSnapshot,

    /// Registered background workers
    pub workers: Vec<String>,
}

/// The storage engine
///
/// ## Concurrency Model
///
/// - **Lookups** share the index read lock and never wait on disk I/O
/// - **Mutations** take the index write lock, change the index, queue the
///   write-back job, and return; the bio worker persists it later
/// - **Dumps** hold the read lock from the snapshot until the write-back
///   log is truncated
pub struct Engine {
    config: Config,

    /// Authoritative in-memory state
    index: RwLock<RbTree<Value>>,

    /// Persisted store, shared with the bio worker
    disk: Arc<Disk>,

    pool: BgPool,

    bio: Bio,

    /// Set under the index write lock once exit begins
    closed: AtomicBool,

    /// `Some` between a disk clear and the next dump: the keys written back
    /// whole since the clear. Any other key has no base record on disk.
    rebased: Mutex<Option<HashSet<Vec<u8>, BuildKeyHasher>>>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the data directory
    /// 2. Load the snapshot and replay the write-back log
    /// 3. Fold a non-empty log into a fresh snapshot (if enabled)
    /// 4. Start the worker pool and register the bio worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let disk = Arc::new(Disk::open(&config.data_dir, config.sync_strategy)?);
        let index = disk.load()?;

        if config.compact_on_open && disk.log_len()? > 0 {
            disk.dump(&index)?;
        }

        let pool = BgPool::new();
        let bio = Bio::start(&pool, disk.clone(), config.retry_interval())?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            keys = index.len(),
            "engine opened"
        );

        Ok(Self {
            config,
            index: RwLock::new(index),
            disk,
            pool,
            bio,
            closed: AtomicBool::new(false),
            rebased: Mutex::new(None),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Execute a request
    ///
    /// Routes each operation to its handler, stamping write-back jobs with
    /// the request's timestamp.
    pub fn execute(&self, request: Request) -> Result<Response> {
        tracing::trace!(kind = %request.kind(), hash = request.hash, "executing request");
        let ts = request.timestamp;

        match request.operation {
            Operation::ListRPush { key, value } => {
                self.push(&key, &value, ListEnd::Tail, ts).map(Response::Count)
            }
            Operation::ListLPush { key, value } => {
                self.push(&key, &value, ListEnd::Head, ts).map(Response::Count)
            }
            Operation::ListRemove { key, selection } => {
                self.remove_entries(&key, &selection, ts).map(Response::Count)
            }
            Operation::ListLookup { key, selection } => {
                self.list_lookup(&key, &selection).map(Response::Entries)
            }
            Operation::ListSet { key, index, value } => {
                Ok(match self.set_entry(&key, index, &value, ts)? {
                    Some(previous) => Response::Bytes(previous),
                    None => Response::Done,
                })
            }
            Operation::ListLength { key } => self.list_length(&key).map(Response::Count),
            Operation::StringInsert { key, value } => {
                self.insert_string(&key, &value, ts).map(Response::Previous)
            }
            Operation::StringRemove { key } => self.remove_string(&key, ts).map(Response::Bytes),
            Operation::StringLookup { key } => self.string_lookup(&key).map(Response::Bytes),
            Operation::KeyDelete { key } => self
                .delete_key(&key, ts)
                .map(|value| Response::Previous(Some(value))),
        }
    }

    // =========================================================================
    // List Operations
    // =========================================================================

    /// Append `value` at the tail, creating the list if needed
    ///
    /// Returns the new list length.
    pub fn list_rpush(&self, key: &[u8], value: &[u8]) -> Result<usize> {
        self.push(key, value, ListEnd::Tail, now_millis())
    }

    /// Prepend `value` at the head, creating the list if needed
    pub fn list_lpush(&self, key: &[u8], value: &[u8]) -> Result<usize> {
        self.push(key, value, ListEnd::Head, now_millis())
    }

    /// Remove the selected entries, returning how many were removed
    ///
    /// A list left empty is removed from the index.
    pub fn list_remove(&self, key: &[u8], selection: &Selection) -> Result<usize> {
        self.remove_entries(key, selection, now_millis())
    }

    /// Entries matched by `selection`, in selection order
    ///
    /// `NotFound` when the key is absent or nothing is selected.
    pub fn list_lookup(&self, key: &[u8], selection: &Selection) -> Result<Vec<Vec<u8>>> {
        let index = self.index.read();
        let list = index.get(key).ok_or(EmberError::NotFound)?.as_list()?;
        let entries = list.lookup(selection);
        if entries.is_empty() {
            return Err(EmberError::NotFound);
        }
        Ok(entries)
    }

    /// Overwrite the entry at `index`, returning the entry it replaced
    ///
    /// An index past the end appends; an absent key becomes a one-entry list.
    pub fn list_set(&self, key: &[u8], index: i64, value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.set_entry(key, index, value, now_millis())
    }

    pub fn list_length(&self, key: &[u8]) -> Result<usize> {
        let index = self.index.read();
        Ok(index.get(key).ok_or(EmberError::NotFound)?.as_list()?.len())
    }

    fn push(&self, key: &[u8], value: &[u8], end: ListEnd, ts: u64) -> Result<usize> {
        let mut index = self.write_index()?;

        let len = match index.get_mut(key) {
            Some(record) => record.as_list_mut()?.push(end, value)?,
            None => {
                let mut list = ListValue::new();
                list.push(end, value)?;
                index.insert(key.to_vec(), Value::List(list));
                1
            }
        };

        let delta = WriteOp::ListPush {
            end,
            entry: value.to_vec(),
        };
        self.list_back(&index, key, delta, ts);
        Ok(len)
    }

    fn remove_entries(&self, key: &[u8], selection: &Selection, ts: u64) -> Result<usize> {
        let mut index = self.write_index()?;

        let list = index.get_mut(key).ok_or(EmberError::NotFound)?.as_list_mut()?;
        let positions = list.positions(selection);
        let removed = list.remove_positions(&positions);
        let emptied = list.is_empty();

        if emptied {
            index.remove(key);
            self.write_back(key, WriteOp::Delete, ts);
        } else if removed > 0 {
            self.list_back(&index, key, WriteOp::ListRemove { positions }, ts);
        }
        Ok(removed)
    }

    fn set_entry(&self, key: &[u8], at: i64, value: &[u8], ts: u64) -> Result<Option<Vec<u8>>> {
        let mut index = self.write_index()?;

        let appended = WriteOp::ListPush {
            end: ListEnd::Tail,
            entry: value.to_vec(),
        };
        let (previous, delta) = match index.get_mut(key) {
            Some(record) => match record.as_list_mut()?.set(at, value)? {
                SetOutcome::Replaced { position, previous } => {
                    let delta = WriteOp::ListSet {
                        position,
                        entry: value.to_vec(),
                    };
                    (Some(previous), delta)
                }
                SetOutcome::Appended => (None, appended),
            },
            None => {
                let mut list = ListValue::new();
                list.push_back(value)?;
                index.insert(key.to_vec(), Value::List(list));
                (None, appended)
            }
        };

        self.list_back(&index, key, delta, ts);
        Ok(previous)
    }

    // =========================================================================
    // String Operations
    // =========================================================================

    /// Store `value` under `key`, replacing whatever record was there
    pub fn string_insert(&self, key: &[u8], value: &[u8]) -> Result<Option<Value>> {
        self.insert_string(key, value, now_millis())
    }

    /// Remove a string record and return its bytes
    pub fn string_remove(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.remove_string(key, now_millis())
    }

    pub fn string_lookup(&self, key: &[u8]) -> Result<Vec<u8>> {
        let index = self.index.read();
        Ok(index.get(key).ok_or(EmberError::NotFound)?.as_string()?.to_vec())
    }

    fn insert_string(&self, key: &[u8], value: &[u8], ts: u64) -> Result<Option<Value>> {
        let value = Value::string_from(value)?;
        let mut index = self.write_index()?;

        let previous = index.insert(key.to_vec(), value.clone());
        self.write_back(key, WriteOp::Store(value), ts);
        Ok(previous)
    }

    fn remove_string(&self, key: &[u8], ts: u64) -> Result<Vec<u8>> {
        let mut index = self.write_index()?;

        index.get(key).ok_or(EmberError::NotFound)?.as_string()?;
        let bytes = match index.remove(key) {
            Some(Value::String(bytes)) => bytes,
            _ => return Err(EmberError::NotFound),
        };

        self.write_back(key, WriteOp::Delete, ts);
        Ok(bytes)
    }

    // =========================================================================
    // Key Operations
    // =========================================================================

    /// Remove a record of any type and return it
    pub fn key_delete(&self, key: &[u8]) -> Result<Value> {
        self.delete_key(key, now_millis())
    }

    fn delete_key(&self, key: &[u8], ts: u64) -> Result<Value> {
        let mut index = self.write_index()?;
        let value = index.remove(key).ok_or(EmberError::NotFound)?;
        self.write_back(key, WriteOp::Delete, ts);
        Ok(value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// All keys in ascending order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index.read().keys().map(<[u8]>::to_vec).collect()
    }

    /// Placement bucket of `key`
    pub fn bucket_of(&self, key: &[u8]) -> u64 {
        hash::bucket(key, self.config.bucket_count)
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Block until every mutation made so far has been written back
    pub fn sync(&self) -> Result<()> {
        self.bio.sync()
    }

    /// Write a full snapshot and truncate the write-back log
    ///
    /// Fails with the write-back error, without writing anything, while the
    /// bio worker cannot persist the jobs ahead of it.
    pub fn dump(&self) -> Result<DumpStats> {
        let index = self.index.read();
        self.drain_under_read_lock()?;
        let stats = self.disk.dump(&index)?;
        *self.rebased.lock() = None;
        Ok(stats)
    }

    /// Delete everything persisted; the in-memory index is left alone
    pub fn disk_clear(&self) -> Result<()> {
        let _index = self.index.read();
        self.drain_under_read_lock()?;
        self.disk.clear()?;
        *self.rebased.lock() = Some(HashSet::with_hasher(BuildKeyHasher));
        Ok(())
    }

    /// Pending jobs must land before the log is truncated, or they would be
    /// replayed over a newer snapshot. Mutations are held off by the caller's
    /// read lock, so the queue can only shrink here.
    fn drain_under_read_lock(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.bio.sync()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop accepting mutations, drain the bio queue, stop every worker and
    /// write the exit snapshot
    ///
    /// Safe to call more than once; only the first call does any work.
    pub fn exit(&self) -> Result<()> {
        {
            let _index = self.index.write();
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }

        let stats = self.bio.exit(&self.pool)?;
        self.pool.exit();

        if stats.dropped > 0 {
            tracing::warn!(
                dropped = stats.dropped,
                "write-back jobs were dropped, relying on the exit snapshot"
            );
        }

        if self.config.dump_on_exit {
            let index = self.index.read();
            self.disk.dump(&index)?;
        }

        tracing::info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    /// Close the engine gracefully
    pub fn close(self) -> Result<()> {
        self.exit()
    }

    // =========================================================================
    // Workers
    // =========================================================================

    /// Wake a background worker by name
    pub fn signal_worker(&self, name: &str) -> Result<()> {
        self.pool.signal(name)
    }

    /// The engine's worker pool
    pub fn pool(&self) -> &BgPool {
        &self.pool
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Check the red-black invariants of the index under the read lock
    ///
    /// Returns the black height on success.
    pub fn validate_index(&self) -> std::result::Result<usize, InvariantViolation> {
        self.index.read().validate()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            keys: self.len(),
            pending_jobs: self.bio.pending(),
            bio: self.bio.stats(),
            workers: self.pool.names(),
        }
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, RbTree<Value>>> {
        let index = self.index.write();
        if self.closed.load(Ordering::SeqCst) {
            return Err(EmberError::Shutdown("engine has exited".to_string()));
        }
        Ok(index)
    }

    /// Queue a list delta, or the whole list when the disk holds no base
    /// record for `key` to apply it to
    fn list_back(&self, index: &RbTree<Value>, key: &[u8], delta: WriteOp, ts: u64) {
        let needs_base = match self.rebased.lock().as_mut() {
            Some(rebased) => rebased.insert(key.to_vec()),
            None => false,
        };
        match index.get(key) {
            Some(value) if needs_base => self.write_back(key, WriteOp::Store(value.clone()), ts),
            _ => self.write_back(key, delta, ts),
        }
    }

    /// The queue logs and drops the job if it has already closed
    fn write_back(&self, key: &[u8], op: WriteOp, ts: u64) {
        if matches!(op, WriteOp::Store(_) | WriteOp::Delete) {
            if let Some(rebased) = self.rebased.lock().as_mut() {
                rebased.insert(key.to_vec());
            }
        }
        self.bio.enqueue(key.to_vec(), op, ts);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            tracing::error!(error = %e, "engine exit failed during drop");
        }
    }
}
