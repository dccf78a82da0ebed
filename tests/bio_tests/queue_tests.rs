//! Tests for the Background I/O Queue
//!
//! These tests verify:
//! - Strict FIFO between jobs
//! - Blocking dequeue and drain-on-close
//! - The "bio-worker" registration and its persistence order
//! - Retry of failed writes, drop only during shutdown
//! - Barriers report write-back and flush failures instead of hanging

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use emberkv::bg::{BgPool, WorkSource};
use emberkv::bio::{Bio, BioJob, BioQueue, WriteBack, WriteJob, WriteOp, WORKER_NAME};
use emberkv::error::{EmberError, Result};
use emberkv::value::Value;
use crossbeam::channel;
use parking_lot::Mutex;

// =============================================================================
// Helper Functions
// =============================================================================

/// Sink that records every persisted key in order
#[derive(Default)]
struct RecordingSink {
    persisted: Mutex<Vec<Vec<u8>>>,
    flushes: AtomicUsize,
}

impl RecordingSink {
    fn keys(&self) -> Vec<Vec<u8>> {
        self.persisted.lock().clone()
    }
}

impl WriteBack for RecordingSink {
    fn persist(&self, job: &WriteJob) -> Result<()> {
        self.persisted.lock().push(job.key.clone());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that fails its first `failures` attempts
struct FlakySink {
    failures: usize,
    attempts: AtomicUsize,
    inner: RecordingSink,
}

impl FlakySink {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            inner: RecordingSink::default(),
        }
    }
}

impl WriteBack for FlakySink {
    fn persist(&self, job: &WriteJob) -> Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(EmberError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk unavailable",
            )));
        }
        self.inner.persist(job)
    }
}

/// Sink that persists everything but cannot make it durable
#[derive(Default)]
struct UnflushableSink {
    inner: RecordingSink,
}

impl WriteBack for UnflushableSink {
    fn persist(&self, job: &WriteJob) -> Result<()> {
        self.inner.persist(job)
    }

    fn flush(&self) -> Result<()> {
        Err(EmberError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "fsync failed",
        )))
    }
}

/// Poll `condition` until it holds or `timeout` passes
fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn store(value: &str) -> WriteOp {
    WriteOp::Store(Value::String(value.as_bytes().to_vec()))
}

fn job_key(job: BioJob) -> Vec<u8> {
    match job {
        BioJob::Write(job) => job.key,
        BioJob::Barrier(_) => panic!("unexpected barrier"),
    }
}

// =============================================================================
// Queue Tests
// =============================================================================

#[test]
fn test_dequeue_is_fifo() {
    let queue = BioQueue::new();

    queue.enqueue_write(b"job1".to_vec(), store("1"), 0).unwrap();
    queue.enqueue_write(b"job2".to_vec(), WriteOp::Delete, 0).unwrap();
    queue.enqueue_write(b"job3".to_vec(), store("3"), 0).unwrap();

    assert_eq!(job_key(queue.dequeue().unwrap()), b"job1");
    assert_eq!(job_key(queue.dequeue().unwrap()), b"job2");
    assert_eq!(job_key(queue.dequeue().unwrap()), b"job3");
    assert!(queue.try_dequeue().is_none());
}

#[test]
fn test_sequence_numbers_increase() {
    let queue = BioQueue::new();

    let first = queue.enqueue_write(b"a".to_vec(), store("x"), 0).unwrap();
    let second = queue.enqueue_write(b"a".to_vec(), store("y"), 0).unwrap();

    assert!(second > first);
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_dequeue_blocks_until_enqueue() {
    let queue = Arc::new(BioQueue::new());
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.dequeue().map(job_key))
    };

    thread::sleep(Duration::from_millis(20));
    queue.enqueue_write(b"late".to_vec(), store("v"), 0).unwrap();

    assert_eq!(consumer.join().unwrap(), Some(b"late".to_vec()));
}

#[test]
fn test_close_drains_then_ends() {
    let queue = BioQueue::new();
    queue.enqueue_write(b"a".to_vec(), store("1"), 0).unwrap();
    queue.enqueue_write(b"b".to_vec(), store("2"), 0).unwrap();

    queue.close();

    assert!(queue.enqueue_write(b"c".to_vec(), store("3"), 0).is_none());
    assert_eq!(job_key(queue.dequeue().unwrap()), b"a");
    assert_eq!(job_key(queue.dequeue().unwrap()), b"b");
    assert!(queue.dequeue().is_none());
}

#[test]
fn test_wake_cuts_backoff_short() {
    let queue = Arc::new(BioQueue::new());
    let waker = {
        let queue = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            queue.wake();
        })
    };

    let started = Instant::now();
    let closed = queue.backoff(Duration::from_secs(10));

    assert!(!closed);
    assert!(started.elapsed() < Duration::from_secs(5));
    waker.join().unwrap();
}

#[test]
fn test_backoff_reports_close() {
    let queue = BioQueue::new();
    queue.close();

    assert!(queue.backoff(Duration::from_secs(10)));
}

// =============================================================================
// Worker Tests
// =============================================================================

#[test]
fn test_bio_registers_worker() {
    let pool = BgPool::new();
    let sink = Arc::new(RecordingSink::default());

    let bio = Bio::start(&pool, sink, Duration::from_millis(1)).unwrap();

    assert!(pool.contains(WORKER_NAME));
    pool.signal(WORKER_NAME).unwrap();
    bio.signal();
    bio.exit(&pool).unwrap();
    assert!(!pool.contains(WORKER_NAME));
}

#[test]
fn test_second_bio_worker_is_duplicate() {
    let pool = BgPool::new();
    let _bio = Bio::start(&pool, Arc::new(RecordingSink::default()), Duration::from_millis(1))
        .unwrap();

    let result = Bio::start(&pool, Arc::new(RecordingSink::default()), Duration::from_millis(1));

    assert!(matches!(result, Err(EmberError::DuplicateName(_))));
}

#[test]
fn test_disk_observes_jobs_in_order() {
    let pool = BgPool::new();
    let sink = Arc::new(RecordingSink::default());
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    bio.enqueue(b"job1".to_vec(), store("1"), 1).unwrap();
    bio.enqueue(b"job2".to_vec(), store("2"), 2).unwrap();
    bio.sync().unwrap();

    assert_eq!(sink.keys(), vec![b"job1".to_vec(), b"job2".to_vec()]);
}

#[test]
fn test_many_jobs_keep_order() {
    let pool = BgPool::new();
    let sink = Arc::new(RecordingSink::default());
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    let expected: Vec<Vec<u8>> = (0..500).map(|i| format!("k{:04}", i).into_bytes()).collect();
    for key in &expected {
        bio.enqueue(key.clone(), WriteOp::Delete, 0).unwrap();
    }
    bio.sync().unwrap();

    assert_eq!(sink.keys(), expected);
    assert_eq!(bio.stats().persisted, 500);
    assert!(sink.flushes.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_exit_drains_queued_jobs() {
    let pool = BgPool::new();
    let sink = Arc::new(RecordingSink::default());
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    for i in 0..100 {
        bio.enqueue(format!("k{}", i).into_bytes(), WriteOp::Delete, 0).unwrap();
    }
    let stats = bio.exit(&pool).unwrap();

    assert_eq!(sink.keys().len(), 100);
    assert_eq!(stats.persisted, 100);
    assert_eq!(stats.dropped, 0);
    assert!(bio.enqueue(b"after".to_vec(), WriteOp::Delete, 0).is_none());
    assert!(matches!(bio.sync(), Err(EmberError::Shutdown(_))));
}

#[test]
fn test_failed_write_is_retried_in_place() {
    let pool = BgPool::new();
    let sink = Arc::new(FlakySink::new(3));
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    bio.enqueue(b"first".to_vec(), store("1"), 0).unwrap();
    bio.enqueue(b"second".to_vec(), store("2"), 0).unwrap();
    assert!(wait_until(Duration::from_secs(5), || bio.stats().persisted == 2));
    bio.sync().unwrap();

    assert_eq!(sink.inner.keys(), vec![b"first".to_vec(), b"second".to_vec()]);
    let stats = bio.stats();
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.persisted, 2);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn test_persistent_failure_dropped_only_at_exit() {
    let pool = BgPool::new();
    let sink = Arc::new(FlakySink::new(usize::MAX));
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    bio.enqueue(b"doomed".to_vec(), store("x"), 0).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(bio.stats().dropped, 0);

    let stats = bio.exit(&pool).unwrap();

    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.persisted, 0);
    assert!(stats.retries >= 1);
}

// =============================================================================
// Barrier Failure Tests
// =============================================================================

#[test]
fn test_sync_fails_fast_while_job_keeps_failing() {
    let pool = BgPool::new();
    let sink = Arc::new(FlakySink::new(usize::MAX));
    let bio = Arc::new(Bio::start(&pool, sink, Duration::from_millis(10)).unwrap());

    bio.enqueue(b"stuck".to_vec(), store("x"), 0).unwrap();

    let (tx, rx) = channel::bounded(1);
    let waiter = {
        let bio = bio.clone();
        thread::spawn(move || tx.send(bio.sync()).unwrap())
    };
    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("sync blocked behind a failing job");
    waiter.join().unwrap();

    match result {
        Err(EmberError::Io(e)) => assert!(e.to_string().contains("disk unavailable")),
        other => panic!("expected an I/O error, got {:?}", other),
    }
    // The job stays queued for retry; nothing was dropped.
    assert_eq!(bio.stats().dropped, 0);

    let stats = bio.exit(&pool).unwrap();
    assert_eq!(stats.dropped, 1);
}

#[test]
fn test_sync_succeeds_once_failures_stop() {
    let pool = BgPool::new();
    let sink = Arc::new(FlakySink::new(5));
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    bio.enqueue(b"late".to_vec(), store("x"), 0).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut failed_syncs = 0;
    while bio.sync().is_err() {
        failed_syncs += 1;
        assert!(Instant::now() < deadline, "write-back never recovered");
    }

    assert!(failed_syncs <= 5);
    assert_eq!(sink.inner.keys(), vec![b"late".to_vec()]);
    assert_eq!(bio.stats().persisted, 1);
}

#[test]
fn test_sync_reports_flush_failure() {
    let pool = BgPool::new();
    let sink = Arc::new(UnflushableSink::default());
    let bio = Bio::start(&pool, sink.clone(), Duration::from_millis(1)).unwrap();

    bio.enqueue(b"written".to_vec(), store("x"), 0).unwrap();

    assert!(matches!(bio.sync(), Err(EmberError::Io(_))));
    assert_eq!(sink.inner.keys(), vec![b"written".to_vec()]);
}

#[test]
fn test_fail_barriers_leaves_writes_queued() {
    let queue = BioQueue::new();
    let (first_ack, first_done) = channel::bounded(1);
    let (second_ack, second_done) = channel::bounded(1);

    queue.enqueue_write(b"a".to_vec(), WriteOp::Delete, 0).unwrap();
    assert!(queue.enqueue_barrier(first_ack));
    queue.enqueue_write(b"b".to_vec(), WriteOp::Delete, 0).unwrap();
    assert!(queue.enqueue_barrier(second_ack));

    let error = EmberError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
    assert_eq!(queue.fail_barriers(&error), 2);

    assert!(matches!(first_done.recv().unwrap(), Err(EmberError::Io(_))));
    assert!(matches!(second_done.recv().unwrap(), Err(EmberError::Io(_))));
    assert_eq!(queue.len(), 2);
    assert_eq!(job_key(queue.try_dequeue().unwrap()), b"a".to_vec());
    assert_eq!(job_key(queue.try_dequeue().unwrap()), b"b".to_vec());
}
