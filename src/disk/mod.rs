//! Disk Module
//!
//! Durable backing store for the index.
//!
//! ## Responsibilities
//! - Persist single records written back by the bio worker
//! - Dump a full snapshot of the index and load it back
//! - Own the on-disk files; nothing else touches them
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── dump.ekv        (snapshot, see `snapshot`)
//!   └── writeback.log   (records since the snapshot, see `log`)
//! ```
//!
//! Load = decode the snapshot, then replay the log over it in order. A dump
//! replaces the snapshot atomically (temp file + rename) and then truncates
//! the log, since every record in it is now covered by the snapshot.

pub mod log;
pub mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;

use crate::bio::{WriteBack, WriteJob, WriteOp};
use crate::config::SyncStrategy;
use crate::error::Result;
use crate::index::RbTree;
use crate::request::now_millis;
use crate::value::Value;

use self::log::{LogOp, LogRecord, LogWriter};

/// Summary of a completed dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpStats {
    /// Number of records written
    pub entries: usize,

    /// Snapshot size in bytes
    pub bytes: u64,
}

struct DiskState {
    log: LogWriter,
    /// Sequence of the last record appended, shared by every write path and
    /// resumed from the log on load
    last_seq: u64,
    records_written: u64,
    last_update: Option<u64>,
}

/// The persisted store
pub struct Disk {
    dir: PathBuf,
    snapshot_path: PathBuf,
    log_path: PathBuf,
    state: Mutex<DiskState>,
}

impl Disk {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const SNAPSHOT_FILENAME: &'static str = "dump.ekv";
    const SNAPSHOT_TMP_FILENAME: &'static str = "dump.ekv.tmp";
    const LOG_FILENAME: &'static str = "writeback.log";

    /// Open or create the store in `dir`
    pub fn open(dir: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let snapshot_path = dir.join(Self::SNAPSHOT_FILENAME);
        let log_path = dir.join(Self::LOG_FILENAME);
        let log = LogWriter::open(&log_path, sync_strategy)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            snapshot_path,
            log_path,
            state: Mutex::new(DiskState {
                log,
                last_seq: 0,
                records_written: 0,
                last_update: None,
            }),
        })
    }

    // =========================================================================
    // Single-record Writes
    // =========================================================================

    /// Persist one record
    pub fn write(&self, key: &[u8], value: &Value) -> Result<()> {
        self.append_local(LogOp::Store {
            key: key.to_vec(),
            value: value.clone(),
        })
    }

    /// Persist the removal of a key
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.append_local(LogOp::Delete { key: key.to_vec() })
    }

    fn append_local(&self, op: LogOp) -> Result<()> {
        Self::append(&mut self.state.lock(), now_millis(), op)
    }

    /// The sequence number is only consumed once the record is in the log
    fn append(state: &mut DiskState, timestamp: u64, op: LogOp) -> Result<()> {
        let record = LogRecord {
            seq: state.last_seq + 1,
            timestamp,
            op,
        };
        state.log.append(&record)?;
        state.last_seq = record.seq;
        state.records_written += 1;
        state.last_update = Some(timestamp);
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Write a full snapshot of `index` and truncate the write-back log
    ///
    /// The caller must keep `index` from changing until this returns, or
    /// mutations made in between could be truncated out of the log before
    /// the next snapshot picks them up.
    pub fn dump(&self, index: &RbTree<Value>) -> Result<DumpStats> {
        let started = Instant::now();
        let bytes = snapshot::encode(index)?;

        let tmp_path = self.dir.join(Self::SNAPSHOT_TMP_FILENAME);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        let mut state = self.state.lock();
        fs::rename(&tmp_path, &self.snapshot_path)?;
        sync_dir(&self.dir);
        state.log.truncate()?;

        let stats = DumpStats {
            entries: index.len(),
            bytes: bytes.len() as u64,
        };
        tracing::info!(
            entries = stats.entries,
            bytes = stats.bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "snapshot written"
        );
        Ok(stats)
    }

    /// Rebuild the index from the snapshot plus the write-back log
    ///
    /// Fails with `CorruptData` on any format violation, returning nothing
    /// partially built. A torn final log record is cut off.
    pub fn load(&self) -> Result<RbTree<Value>> {
        let mut index = match fs::read(&self.snapshot_path) {
            Ok(bytes) => snapshot::decode(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => RbTree::new(),
            Err(e) => return Err(e.into()),
        };
        let from_snapshot = index.len();

        let mut state = self.state.lock();
        state.log.sync()?;
        let replay = log::read_log(&self.log_path)?;
        let replayed = replay.records.len();
        for record in replay.records {
            state.last_seq = state.last_seq.max(record.seq);
            record.apply(&mut index)?;
        }

        if replay.torn_tail {
            tracing::warn!(
                valid_len = replay.valid_len,
                "write-back log ends in a partial record, truncating"
            );
            state.log.truncate_to(replay.valid_len)?;
        }

        tracing::info!(
            from_snapshot,
            replayed,
            keys = index.len(),
            "index loaded from disk"
        );
        Ok(index)
    }

    /// Delete the snapshot and empty the write-back log
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        match fs::remove_file(&self.snapshot_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        state.log.truncate()?;
        tracing::info!(dir = %self.dir.display(), "disk cleared");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Current size of the write-back log in bytes
    pub fn log_len(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state.log.sync()?;
        Ok(fs::metadata(&self.log_path)?.len())
    }

    /// Records appended to the log since open
    pub fn records_written(&self) -> u64 {
        self.state.lock().records_written
    }

    /// Timestamp of the last record appended since open
    pub fn last_update(&self) -> Option<u64> {
        self.state.lock().last_update
    }
}

impl WriteBack for Disk {
    fn persist(&self, job: &WriteJob) -> Result<()> {
        let key = job.key.clone();
        let op = match &job.op {
            WriteOp::Store(value) => LogOp::Store {
                key,
                value: value.clone(),
            },
            WriteOp::Delete => LogOp::Delete { key },
            WriteOp::ListPush { end, entry } => LogOp::ListPush {
                key,
                end: *end,
                entry: entry.clone(),
            },
            WriteOp::ListSet { position, entry } => LogOp::ListSet {
                key,
                position: *position,
                entry: entry.clone(),
            },
            WriteOp::ListRemove { positions } => LogOp::ListRemove {
                key,
                positions: positions.clone(),
            },
        };
        Self::append(&mut self.state.lock(), job.timestamp, op)
    }

    fn flush(&self) -> Result<()> {
        self.state.lock().log.sync()
    }
}

/// Make a rename durable. Best effort: not every platform can open a
/// directory for syncing.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        if let Err(e) = handle.sync_all() {
            tracing::debug!(error = %e, "directory sync skipped");
        }
    }
}
