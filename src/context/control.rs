use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use rowflow_core::RowSet;
use serde::Serialize;

/// The first step copy that failed during a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub step: String,
    pub copy: usize,
    pub message: String,
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.step, self.copy, self.message)
    }
}

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    rowsets: Mutex<Vec<Arc<RowSet>>>,
    errors: AtomicU64,
    first_error: Mutex<Option<FailedStep>>,
}

/// Transformation-wide run flags shared by every step copy of one run.
///
/// Only start, stop and pause transitions go through here; the steady-state row
/// path never touches it beyond reading `is_stopped`.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    inner: Arc<Inner>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds row sets to be stopped by [`stop`](Self::stop) and [`abort`](Self::abort).
    pub fn register_rowsets<I>(&self, rowsets: I)
    where
        I: IntoIterator<Item = Arc<RowSet>>,
    {
        let mut registered = self.inner.rowsets.lock();
        registered.extend(rowsets);
        if self.is_stopped() {
            registered.iter().for_each(|rowset| rowset.stop());
        }
    }

    pub fn rowsets(&self) -> Vec<Arc<RowSet>> {
        self.inner.rowsets.lock().clone()
    }

    /// External stop request. Reported as a cancellation, not a failure.
    pub fn stop(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.halt();
    }

    /// Stop caused by a failing step.
    pub fn abort(&self) {
        self.halt();
    }

    fn halt(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for rowset in self.inner.rowsets.lock().iter() {
            rowset.stop();
        }
        let _paused = self.inner.paused.lock();
        self.inner.resumed.notify_all();
    }

    /// Counts a step failure, remembers it if it is the first, and stops the run.
    pub fn record_error(&self, step: &str, copy: usize, message: String) {
        self.inner.errors.fetch_add(1, Ordering::AcqRel);
        self.inner
            .first_error
            .lock()
            .get_or_insert_with(|| FailedStep {
                step: step.to_owned(),
                copy,
                message,
            });
        self.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u64 {
        self.inner.errors.load(Ordering::Acquire)
    }

    pub fn first_error(&self) -> Option<FailedStep> {
        self.inner.first_error.lock().clone()
    }

    pub fn pause(&self) {
        *self.inner.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.inner.paused.lock() = false;
        self.inner.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.lock()
    }

    /// Parks the caller while the run is paused. Returns early on stop.
    pub fn wait_while_paused(&self, poll_interval: Duration) {
        let mut paused = self.inner.paused.lock();
        while *paused && !self.is_stopped() {
            self.inner.resumed.wait_for(&mut paused, poll_interval);
        }
    }

    /// Short back-off for a step that had nothing to do. Wakes on resume or stop.
    pub fn idle(&self, timeout: Duration) {
        let mut paused = self.inner.paused.lock();
        if !self.is_stopped() {
            self.inner.resumed.wait_for(&mut paused, timeout);
        }
    }
}
