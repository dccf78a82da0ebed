//! Write-back log
//!
//! Append-only file of records written by the bio worker since the last
//! snapshot.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ bincode payload │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2 ...                            │
//! └─────────────────────────────────────────┘
//! ```
//! Integers are little-endian; the CRC covers the payload only.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SyncStrategy;
use crate::error::{EmberError, Result};
use crate::index::RbTree;
use crate::value::{ListEnd, ListValue, Value};

/// Frame header: Len (4) + CRC (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// What a record does to its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    /// The key now holds this record
    Store { key: Vec<u8>, value: Value },

    /// The key was removed
    Delete { key: Vec<u8> },

    /// One entry pushed onto the list at `key`, creating it when absent
    ListPush {
        key: Vec<u8>,
        end: ListEnd,
        entry: Vec<u8>,
    },

    /// The list entry at `position` was overwritten
    ListSet {
        key: Vec<u8>,
        position: usize,
        entry: Vec<u8>,
    },

    /// List entries removed at sorted `positions`
    ListRemove { key: Vec<u8>, positions: Vec<usize> },
}

/// A single write-back log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the log's history, strictly increasing across the file
    /// and across snapshots
    pub seq: u64,

    /// Timestamp (unix millis) of the originating request
    pub timestamp: u64,

    pub op: LogOp,
}

impl LogRecord {
    /// Encode as a framed record
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| EmberError::Serialization(e.to_string()))?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            EmberError::Serialization(format!("record of {} bytes is too large", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Apply the record to an index being rebuilt
    ///
    /// A list delta that does not fit the record it targets means the log
    /// and snapshot disagree: `CorruptData`.
    pub fn apply(self, index: &mut RbTree<Value>) -> Result<()> {
        let seq = self.seq;
        match self.op {
            LogOp::Store { key, value } => {
                index.insert(key, value);
            }
            LogOp::Delete { key } => {
                index.remove(&key);
            }
            LogOp::ListPush { key, end, entry } => match index.get_mut(&key) {
                Some(record) => {
                    list_target(record, seq)?.push(end, &entry)?;
                }
                None => {
                    let mut list = ListValue::new();
                    list.push(end, &entry)?;
                    index.insert(key, Value::List(list));
                }
            },
            LogOp::ListSet {
                key,
                position,
                entry,
            } => {
                let list = list_target(missing_target(index.get_mut(&key), seq)?, seq)?;
                if list.replace(position, &entry)?.is_none() {
                    return Err(delta_mismatch(seq, "set position past the end of the list"));
                }
            }
            LogOp::ListRemove { key, positions } => {
                let list = list_target(missing_target(index.get_mut(&key), seq)?, seq)?;
                if list.remove_positions(&positions) != positions.len() {
                    return Err(delta_mismatch(seq, "remove position past the end of the list"));
                }
                if list.is_empty() {
                    index.remove(&key);
                }
            }
        }
        Ok(())
    }
}

fn missing_target(record: Option<&mut Value>, seq: u64) -> Result<&mut Value> {
    record.ok_or_else(|| delta_mismatch(seq, "list delta for an absent key"))
}

fn list_target(record: &mut Value, seq: u64) -> Result<&mut ListValue> {
    match record {
        Value::List(list) => Ok(list),
        Value::String(_) => Err(delta_mismatch(seq, "list delta for a string record")),
    }
}

fn delta_mismatch(seq: u64, what: &str) -> EmberError {
    EmberError::CorruptData(format!("write-back record {}: {}", seq, what))
}

// =============================================================================
// Writer
// =============================================================================

/// Appends records to the write-back log
///
/// A failed append is cut back off the file, so a retry never lands behind
/// half a frame.
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_strategy: SyncStrategy,
    unsynced: usize,

    /// Bytes of whole frames in the file
    len: u64,

    /// Length to restore before the next append, when a rollback failed
    rollback_to: Option<u64>,
}

impl LogWriter {
    /// Open or create the log for appending
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            sync_strategy,
            unsynced: 0,
            len,
            rollback_to: None,
        })
    }

    /// Append one record, syncing according to the strategy
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let frame = record.encode()?;
        self.append_frame(&frame, |writer, frame| {
            writer.write_all(frame)?;
            writer.flush()
        })
    }

    /// Append an encoded frame through `write`, rolling the file back to its
    /// previous length if `write` fails part-way
    fn append_frame<F>(&mut self, frame: &[u8], write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>, &[u8]) -> io::Result<()>,
    {
        if let Some(len) = self.rollback_to {
            self.discard_tail(len)?;
        }

        let previous = self.len;
        if let Err(e) = write(&mut self.writer, frame) {
            self.rollback_to = Some(previous);
            if let Err(rollback) = self.discard_tail(previous) {
                tracing::error!(
                    len = previous,
                    error = %rollback,
                    "could not cut a failed append off the write-back log"
                );
            }
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNRecords { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    /// Throw away buffered bytes and cut the file to `len`
    fn discard_tail(&mut self, len: u64) -> Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        file.set_len(len)?;
        file.sync_all()?;
        // `into_parts` hands back the buffer instead of writing it out.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (_file, _unwritten) = stale.into_parts();

        self.len = len;
        self.rollback_to = None;
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.unsynced > 0 {
            self.writer.get_ref().sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Cut the log back to `len` bytes
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(len)?;
        file.sync_all()?;
        self.unsynced = 0;
        self.len = len;
        self.rollback_to = None;
        Ok(())
    }

    /// Drop every record (after a snapshot made them redundant)
    pub fn truncate(&mut self) -> Result<()> {
        self.truncate_to(0)
    }

    /// Bytes of whole frames written so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Replay
// =============================================================================

/// Records recovered from a log file
#[derive(Debug, Default)]
pub struct LogReplay {
    /// Valid records in file order
    pub records: Vec<LogRecord>,

    /// Byte length of the valid prefix
    pub valid_len: u64,

    /// A partial record was found after the valid prefix
    pub torn_tail: bool,
}

/// Read every record from the log at `path`
///
/// A missing file is an empty log. A record cut short by the end of the file
/// is treated as a torn write and reported through `torn_tail`; a checksum or
/// decode failure is `CorruptData`.
pub fn read_log(path: &Path) -> Result<LogReplay> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LogReplay::default()),
        Err(e) => return Err(e.into()),
    };

    let mut replay = LogReplay::default();
    let mut pos = 0usize;

    while pos < data.len() {
        if data.len() - pos < FRAME_HEADER_SIZE {
            replay.torn_tail = true;
            break;
        }
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let crc = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);

        let start = pos + FRAME_HEADER_SIZE;
        if data.len() - start < len {
            replay.torn_tail = true;
            break;
        }
        let payload = &data[start..start + len];

        if crc32fast::hash(payload) != crc {
            return Err(EmberError::CorruptData(format!(
                "write-back log checksum mismatch at offset {}",
                pos
            )));
        }
        let record: LogRecord = bincode::deserialize(payload).map_err(|e| {
            EmberError::CorruptData(format!("undecodable write-back record at offset {}: {}", pos, e))
        })?;

        replay.records.push(record);
        pos = start + len;
        replay.valid_len = pos as u64;
    }

    Ok(replay)
}
