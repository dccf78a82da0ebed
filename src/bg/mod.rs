//! Background Worker Pool
//!
//! Registry of named worker threads that can be woken individually.
//!
//! ## Responsibilities
//! - Spawn one thread per registered worker, under a unique name
//! - Wake a worker by name or through the handle returned at registration
//! - Stop and join workers on shutdown
//!
//! ## Wakeups
//! Every worker blocks on a [`WorkSource`]. Most workers use a plain
//! [`Signal`]; a worker that drains a queue registers the queue itself as its
//! source, so a signal and an enqueue wake the same condition variable.
//!
//! ## Concurrency
//! - The registry sits behind a `parking_lot::RwLock`
//! - `register`/`stop`/`exit` take the write lock; `signal` only reads
//! - Threads are joined after the lock is released, so a worker may call
//!   back into the pool while it winds down

mod signal;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::{EmberError, Result};
use crate::hash::BuildKeyHasher;

pub use signal::{Signal, Wakeup};

/// Something a worker blocks on
pub trait WorkSource: Send + Sync + 'static {
    /// Make the worker re-check its source
    fn wake(&self);

    /// Ask the worker to finish and return from its run function
    fn shutdown(&self);
}

/// Shared identity of a registered worker
struct WorkerShared {
    id: u64,
    name: String,
    source: Arc<dyn WorkSource>,
    started: Instant,
}

/// Cheap, cloneable reference to a registered worker
///
/// Signalling through a handle skips the registry lookup.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wake the worker
    pub fn signal(&self) {
        self.shared.source.wake();
    }

    /// Time since the worker was registered
    pub fn uptime(&self) -> std::time::Duration {
        self.shared.started.elapsed()
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

struct Worker {
    handle: WorkerHandle,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Ask the worker to stop and wait for its thread
    fn stop_and_join(self) {
        let name = self.handle.name().to_string();
        self.handle.shared.source.shutdown();
        let uptime_ms = self.handle.uptime().as_millis() as u64;
        match self.thread.join() {
            Ok(()) => tracing::debug!(worker = %name, uptime_ms, "background worker stopped"),
            Err(_) => tracing::error!(worker = %name, uptime_ms, "background worker panicked"),
        }
    }
}

/// Named background worker registry
pub struct BgPool {
    workers: RwLock<HashMap<String, Worker, BuildKeyHasher>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl BgPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::with_hasher(BuildKeyHasher)),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a worker that waits on its own [`Signal`]
    ///
    /// `run` executes on a new thread named `name` and should return once
    /// the signal reports [`Wakeup::Stopped`].
    pub fn register<F>(&self, name: &str, run: F) -> Result<WorkerHandle>
    where
        F: FnOnce(Arc<Signal>) + Send + 'static,
    {
        self.register_with_source(name, Arc::new(Signal::new()), run)
    }

    /// Register a worker that blocks on a caller-provided source
    pub fn register_with_source<S, F>(&self, name: &str, source: Arc<S>, run: F) -> Result<WorkerHandle>
    where
        S: WorkSource,
        F: FnOnce(Arc<S>) + Send + 'static,
    {
        let mut workers = self.workers.write();

        if self.closed.load(Ordering::SeqCst) {
            return Err(EmberError::Shutdown(format!(
                "cannot register '{}' on an exited pool",
                name
            )));
        }
        if workers.contains_key(name) {
            return Err(EmberError::DuplicateName(name.to_string()));
        }

        let shared = Arc::new(WorkerShared {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            source: source.clone(),
            started: Instant::now(),
        });

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(source))?;

        let handle = WorkerHandle { shared };
        workers.insert(
            name.to_string(),
            Worker {
                handle: handle.clone(),
                thread,
            },
        );

        tracing::debug!(worker = %name, id = handle.id(), "background worker registered");
        Ok(handle)
    }

    /// Wake the named worker
    pub fn signal(&self, name: &str) -> Result<()> {
        let workers = self.workers.read();
        let worker = workers
            .get(name)
            .ok_or_else(|| EmberError::WorkerNotFound(name.to_string()))?;
        worker.handle.signal();
        Ok(())
    }

    /// Handle for a registered worker
    pub fn handle(&self, name: &str) -> Result<WorkerHandle> {
        self.workers
            .read()
            .get(name)
            .map(|worker| worker.handle.clone())
            .ok_or_else(|| EmberError::WorkerNotFound(name.to_string()))
    }

    /// Stop one worker and join its thread
    pub fn stop(&self, name: &str) -> Result<()> {
        let worker = self
            .workers
            .write()
            .remove(name)
            .ok_or_else(|| EmberError::WorkerNotFound(name.to_string()))?;
        worker.stop_and_join();
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Registered worker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every worker and join all threads
    ///
    /// Safe to call more than once; later calls find an empty registry.
    /// Registration fails once the pool has exited.
    pub fn exit(&self) {
        let workers = {
            let mut registry = self.workers.write();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *registry)
        };

        if workers.is_empty() {
            return;
        }

        // Wake everyone first so workers wind down in parallel.
        for worker in workers.values() {
            worker.handle.shared.source.shutdown();
        }
        let count = workers.len();
        for (_, worker) in workers {
            worker.stop_and_join();
        }
        tracing::debug!(workers = count, "background pool exited");
    }
}

impl Default for BgPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BgPool {
    fn drop(&mut self) {
        self.exit();
    }
}
