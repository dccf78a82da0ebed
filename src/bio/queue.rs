//! BIO queue
//!
//! FIFO job queue guarded by a mutex, with a condition variable for the
//! blocking dequeue. The queue is independent of the index lock: enqueueing
//! never waits on disk I/O.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::bg::WorkSource;
use crate::error::{EmberError, Result};
use crate::value::{ListEnd, Value};

/// What a write-back job does to its key
///
/// List mutations travel as deltas against the record already persisted,
/// so their cost does not grow with the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Persist the whole record as it stood after the mutation
    Store(Value),

    /// The key no longer exists
    Delete,

    /// One entry pushed at `end`; creates the list when absent
    ListPush { end: ListEnd, entry: Vec<u8> },

    /// The entry at a resolved position was overwritten
    ListSet { position: usize, entry: Vec<u8> },

    /// Entries removed at sorted, resolved positions
    ListRemove { positions: Vec<usize> },
}

/// A disk-bound derivative of one mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteJob {
    /// Queue sequence number, strictly increasing in enqueue order
    pub seq: u64,

    /// Timestamp (unix millis) of the originating request
    pub timestamp: u64,

    pub key: Vec<u8>,

    pub op: WriteOp,
}

/// Entry in the bio queue
#[derive(Debug)]
pub enum BioJob {
    /// Persist one record
    Write(WriteJob),

    /// Flush, then report whether everything queued ahead is persisted
    Barrier(Sender<Result<()>>),
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<BioJob>,
    next_seq: u64,
    closed: bool,
    nudged: bool,
}

/// The bio monitor
#[derive(Default)]
pub struct BioQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

impl BioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write job at the tail, stamping it with the next sequence
    /// number
    ///
    /// Returns the sequence number, or `None` once the queue is closed.
    pub fn enqueue_write(&self, key: Vec<u8>, op: WriteOp, timestamp: u64) -> Option<u64> {
        let mut state = self.state.lock();
        if state.closed {
            tracing::warn!(key = ?String::from_utf8_lossy(&key), "bio queue closed, write-back job dropped");
            return None;
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.jobs.push_back(BioJob::Write(WriteJob {
            seq,
            timestamp,
            key,
            op,
        }));
        drop(state);

        self.condvar.notify_one();
        Some(seq)
    }

    /// Append a barrier at the tail. Returns false once the queue is closed.
    pub fn enqueue_barrier(&self, ack: Sender<Result<()>>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.jobs.push_back(BioJob::Barrier(ack));
        drop(state);

        self.condvar.notify_one();
        true
    }

    /// Pop the oldest job, blocking while the queue is empty
    ///
    /// Returns `None` only after the queue has been closed and every job
    /// queued before the close has been handed out.
    pub fn dequeue(&self) -> Option<BioJob> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state.nudged = false;
            self.condvar.wait(&mut state);
        }
    }

    /// Non-blocking pop
    pub fn try_dequeue(&self) -> Option<BioJob> {
        self.state.lock().jobs.pop_front()
    }

    /// Sleep for up to `timeout` between retries
    ///
    /// Returns early on a wake or a close. Returns true if the queue is
    /// closed.
    pub fn backoff(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.closed && !state.nudged {
            self.condvar.wait_for(&mut state, timeout);
        }
        state.nudged = false;
        state.closed
    }

    /// Stop accepting jobs and wake the consumer so it can drain
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.condvar.notify_all();
    }

    /// Answer every queued barrier with `error` instead of letting it wait
    /// behind a job that keeps failing
    ///
    /// Returns how many barriers were answered.
    pub fn fail_barriers(&self, error: &EmberError) -> usize {
        let mut failed = Vec::new();
        self.state.lock().jobs.retain(|job| match job {
            BioJob::Barrier(ack) => {
                failed.push(ack.clone());
                false
            }
            BioJob::Write(_) => true,
        });

        for ack in &failed {
            // The waiter may have given up already.
            let _ = ack.send(Err(barrier_error(error)));
        }
        failed.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }
}

/// `EmberError` is not `Clone`; every failed barrier gets its own I/O error
/// carrying the original kind and message.
fn barrier_error(error: &EmberError) -> EmberError {
    let kind = match error {
        EmberError::Io(e) => e.kind(),
        _ => std::io::ErrorKind::Other,
    };
    EmberError::Io(std::io::Error::new(
        kind,
        format!("write-back is failing: {}", error),
    ))
}

impl WorkSource for BioQueue {
    fn wake(&self) {
        self.state.lock().nudged = true;
        self.condvar.notify_all();
    }

    fn shutdown(&self) {
        self.close();
    }
}
