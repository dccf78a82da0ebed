//! Background I/O Module
//!
//! Asynchronous write-back of in-memory mutations.
//!
//! ## Responsibilities
//! - Queue one job per mutation, in mutation order
//! - Drain the queue on a worker registered as `"bio-worker"`
//! - Retry failed writes without reordering the queue
//! - Drain everything already queued on exit
//!
//! ## Flow
//! ```text
//!  foreground            bio queue (FIFO)             bio-worker
//!  ──────────            ────────────────             ──────────
//!  mutate index ──────▶ [job 1][job 2][job 3] ──────▶ WriteBack::persist
//!  (index lock)          (own mutex + condvar)         (disk I/O)
//! ```

mod queue;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;

use crate::bg::{BgPool, WorkerHandle};
use crate::error::{EmberError, Result};

pub use queue::{BioJob, BioQueue, WriteJob, WriteOp};

use worker::BioWorker;

/// Name the bio worker is registered under
pub const WORKER_NAME: &str = "bio-worker";

/// Destination of write-back jobs
pub trait WriteBack: Send + Sync + 'static {
    /// Persist one job
    fn persist(&self, job: &WriteJob) -> Result<()>;

    /// Make everything persisted so far durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Write-back counters
#[derive(Debug, Default)]
pub struct BioStats {
    enqueued: AtomicU64,
    persisted: AtomicU64,
    retries: AtomicU64,
    dropped: AtomicU64,
}

impl BioStats {
    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BioStatsSnapshot {
        BioStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BioStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BioStatsSnapshot {
    pub enqueued: u64,
    pub persisted: u64,
    pub retries: u64,
    pub dropped: u64,
}

/// The write-back subsystem: a queue plus the worker draining it
pub struct Bio {
    queue: Arc<BioQueue>,
    worker: WorkerHandle,
    stats: Arc<BioStats>,
}

impl Bio {
    /// Create the queue and register `"bio-worker"` in `pool`
    pub fn start(pool: &BgPool, sink: Arc<dyn WriteBack>, retry_interval: Duration) -> Result<Self> {
        let queue = Arc::new(BioQueue::new());
        let stats = Arc::new(BioStats::default());

        let worker = BioWorker {
            sink,
            stats: stats.clone(),
            retry_interval,
        };
        let handle = pool.register_with_source(WORKER_NAME, queue.clone(), move |queue| {
            worker.run(queue)
        })?;

        Ok(Self {
            queue,
            worker: handle,
            stats,
        })
    }

    /// Queue a write-back job
    ///
    /// Returns the job's sequence number, or `None` if the queue has closed.
    pub fn enqueue(&self, key: Vec<u8>, op: WriteOp, timestamp: u64) -> Option<u64> {
        let seq = self.queue.enqueue_write(key, op, timestamp)?;
        self.stats.record_enqueued();
        Some(seq)
    }

    /// Block until every job queued before this call has been persisted and
    /// flushed
    ///
    /// Fails with the I/O error instead of waiting when a job ahead of the
    /// barrier fails, or when the final flush fails.
    pub fn sync(&self) -> Result<()> {
        let (ack, done) = channel::bounded(1);
        if !self.queue.enqueue_barrier(ack) {
            return Err(EmberError::Shutdown("bio queue is closed".to_string()));
        }
        done.recv().map_err(|_| {
            EmberError::Shutdown("bio worker exited before the barrier".to_string())
        })?
    }

    /// Close the queue, let the worker drain it, then join the worker
    pub fn exit(&self, pool: &BgPool) -> Result<BioStatsSnapshot> {
        self.queue.close();
        match pool.stop(WORKER_NAME) {
            // Already stopped by a pool-wide exit.
            Ok(()) | Err(EmberError::WorkerNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            persisted = stats.persisted,
            retries = stats.retries,
            dropped = stats.dropped,
            "bio subsystem stopped"
        );
        Ok(stats)
    }

    /// Wake the worker so it re-checks the queue (and cuts a retry backoff
    /// short)
    pub fn signal(&self) {
        self.worker.signal();
    }

    /// Jobs waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> BioStatsSnapshot {
        self.stats.snapshot()
    }
}
