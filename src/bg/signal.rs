//! Worker wakeup signal
//!
//! A pending flag and a stop flag under one mutex, with a condition variable
//! to block on. A wake delivered while the worker is busy is remembered and
//! consumed by its next `wait`, so signals are never lost.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::WorkSource;

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Someone called `wake`
    Signaled,

    /// Shutdown was requested
    Stopped,

    /// `wait_timeout` elapsed with nothing pending
    TimedOut,
}

#[derive(Default)]
struct SignalState {
    pending: bool,
    stopped: bool,
}

/// Default [`WorkSource`] for background workers
#[derive(Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until woken or stopped
    ///
    /// Stop takes priority over a pending wake.
    pub fn wait(&self) -> Wakeup {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Wakeup::Stopped;
            }
            if state.pending {
                state.pending = false;
                return Wakeup::Signaled;
            }
            self.condvar.wait(&mut state);
        }
    }

    /// Block until woken, stopped, or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Wakeup {
        let mut state = self.state.lock();
        if !state.stopped && !state.pending {
            self.condvar.wait_for(&mut state, timeout);
        }
        if state.stopped {
            Wakeup::Stopped
        } else if state.pending {
            state.pending = false;
            Wakeup::Signaled
        } else {
            Wakeup::TimedOut
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl WorkSource for Signal {
    fn wake(&self) {
        self.state.lock().pending = true;
        self.condvar.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().stopped = true;
        self.condvar.notify_all();
    }
}
