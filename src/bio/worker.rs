//! BIO worker run loop
//!
//! dequeue → persist → repeat. A failing job is retried in place; later jobs
//! wait behind it so per-queue order is preserved. Barriers queued behind a
//! failing job are answered with the failure rather than left waiting.

use std::sync::Arc;
use std::time::Duration;

use super::queue::{BioJob, BioQueue, WriteJob};
use super::{BioStats, WriteBack};

pub(super) struct BioWorker {
    pub(super) sink: Arc<dyn WriteBack>,
    pub(super) stats: Arc<BioStats>,
    pub(super) retry_interval: Duration,
}

impl BioWorker {
    pub(super) fn run(self, queue: Arc<BioQueue>) {
        tracing::debug!("bio worker started");

        while let Some(job) = queue.dequeue() {
            match job {
                BioJob::Write(job) => self.persist(&queue, job),
                BioJob::Barrier(ack) => {
                    let flushed = self.sink.flush();
                    if let Err(e) = &flushed {
                        tracing::error!(error = %e, "write-back flush failed");
                    }
                    // The waiter may have given up; nothing to do then.
                    let _ = ack.send(flushed);
                }
            }
        }

        if let Err(e) = self.sink.flush() {
            tracing::error!(error = %e, "final write-back flush failed");
        }
        tracing::debug!(
            persisted = self.stats.snapshot().persisted,
            "bio worker drained and stopped"
        );
    }

    fn persist(&self, queue: &BioQueue, job: WriteJob) {
        let mut final_attempt = false;
        loop {
            match self.sink.persist(&job) {
                Ok(()) => {
                    self.stats.record_persisted();
                    tracing::trace!(seq = job.seq, "write-back job persisted");
                    return;
                }
                Err(e) if final_attempt => {
                    self.stats.record_dropped();
                    tracing::error!(
                        seq = job.seq,
                        key = %String::from_utf8_lossy(&job.key),
                        error = %e,
                        "write-back failed during shutdown, job dropped"
                    );
                    return;
                }
                Err(e) => {
                    self.stats.record_retry();
                    let failed_barriers = queue.fail_barriers(&e);
                    tracing::warn!(
                        seq = job.seq,
                        key = %String::from_utf8_lossy(&job.key),
                        error = %e,
                        failed_barriers,
                        "write-back failed, retrying"
                    );
                    final_attempt = queue.backoff(self.retry_interval);
                }
            }
        }
    }
}
