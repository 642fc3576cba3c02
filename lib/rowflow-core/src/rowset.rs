//! Bounded queue of rows between exactly one producer copy and one consumer copy.
//!
//! A [`RowSet`] is the only state two step workers ever share. Producers block
//! in [`RowSet::put`] while the buffer is full, consumers block in
//! [`RowSet::get`] while it is empty; both waits are bounded by the timeout the
//! caller passes so workers can periodically look at the transformation-wide
//! stop flag even when nothing signals them.

use std::{
    collections::VecDeque,
    fmt,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};
use snafu::Snafu;

use crate::{
    row::Row,
    shape::{LayoutError, RowShape},
};

pub const DEFAULT_ROWSET_SIZE: usize = 10_000;

/// Identifies the hop copy pair a row set connects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowSetId {
    pub origin_step: String,
    pub origin_copy: usize,
    pub destination_step: String,
    pub destination_copy: usize,
}

impl RowSetId {
    pub fn new(
        origin_step: impl Into<String>,
        origin_copy: usize,
        destination_step: impl Into<String>,
        destination_copy: usize,
    ) -> Self {
        Self {
            origin_step: origin_step.into(),
            origin_copy,
            destination_step: destination_step.into(),
            destination_copy,
        }
    }
}

impl fmt::Display for RowSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} - {}.{}",
            self.origin_step, self.origin_copy, self.destination_step, self.destination_copy
        )
    }
}

/// Error returned by [`RowSet::put`]. Every variant hands the row back.
#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum PutError {
    /// The buffer stayed full for the whole wait; the caller may retry.
    #[snafu(display("row set is full"))]
    Full { row: Row },
    /// The row set was stopped; the caller must treat this as cancellation.
    #[snafu(display("row set was stopped"))]
    Stopped { row: Row },
    /// The producer already marked the row set done.
    #[snafu(display("row set is already done"))]
    Closed { row: Row },
    /// The row, or the shape it was written with, does not fit the shape fixed
    /// by the first put.
    #[snafu(display("row does not fit the row set shape: {source}"))]
    ShapeMismatch { source: LayoutError, row: Row },
}

impl PutError {
    pub fn into_row(self) -> Row {
        match self {
            Self::Full { row }
            | Self::Stopped { row }
            | Self::Closed { row }
            | Self::ShapeMismatch { row, .. } => row,
        }
    }
}

/// Error returned by [`RowSet::get`].
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(module)]
pub enum GetError {
    /// No row arrived during the wait but more may still come.
    #[snafu(display("row set is empty"))]
    Empty,
    /// The row set was stopped; no further rows will be delivered.
    #[snafu(display("row set was stopped"))]
    Stopped,
}

#[derive(Debug, Default)]
struct State {
    rows: VecDeque<Row>,
    done: bool,
    stopped: bool,
    errored: bool,
}

pub struct RowSet {
    id: RowSetId,
    capacity: Option<NonZeroUsize>,
    // Fixed once, either by the upstream step's declared shape or by the first put.
    shape: OnceCell<Arc<RowShape>>,
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    lines_read: AtomicU64,
    lines_written: AtomicU64,
}

impl RowSet {
    /// Creates a row set holding at most `capacity` rows. A zero capacity is
    /// treated as one.
    pub fn bounded(id: RowSetId, capacity: usize) -> Self {
        Self::new(id, Some(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)))
    }

    /// Creates a row set that never applies backpressure. Used by cooperative
    /// execution where the consumer only runs after the producer yields.
    pub fn unbounded(id: RowSetId) -> Self {
        Self::new(id, None)
    }

    fn new(id: RowSetId, capacity: Option<NonZeroUsize>) -> Self {
        Self {
            id,
            capacity,
            shape: OnceCell::new(),
            state: Mutex::new(State::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            lines_read: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
        }
    }

    pub const fn id(&self) -> &RowSetId {
        &self.id
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    /// The shape of the rows in this set, once known.
    pub fn shape(&self) -> Option<&Arc<RowShape>> {
        self.shape.get()
    }

    /// Fixes the shape ahead of the first row. Returns `false` if a shape was
    /// already fixed.
    pub fn declare_shape(&self, shape: Arc<RowShape>) -> bool {
        self.shape.set(shape).is_ok()
    }

    /// Appends a row, waiting up to `timeout` for free space.
    pub fn put(&self, shape: &Arc<RowShape>, row: Row, timeout: Duration) -> Result<(), PutError> {
        let fixed = self.shape.get_or_init(|| Arc::clone(shape));
        if !Arc::ptr_eq(fixed, shape) {
            if let Err(source) = fixed.check_compatible(shape) {
                return Err(PutError::ShapeMismatch { source, row });
            }
        }
        if fixed.len() != row.len() {
            return Err(PutError::ShapeMismatch {
                source: LayoutError::ColumnCount {
                    expected: fixed.len(),
                    actual: row.len(),
                },
                row,
            });
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while self.is_full(&state) && !state.stopped && !state.done {
            if wait(&self.writable, &mut state, deadline) {
                break;
            }
        }
        if state.stopped {
            return Err(PutError::Stopped { row });
        }
        if state.done {
            return Err(PutError::Closed { row });
        }
        if self.is_full(&state) {
            return Err(PutError::Full { row });
        }
        state.rows.push_back(row);
        drop(state);

        self.lines_written.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
        Ok(())
    }

    /// Takes the oldest row, waiting up to `timeout` for one to arrive.
    ///
    /// `Ok(None)` is the end-of-stream signal: the producer called
    /// [`set_done`](Self::set_done) and every row has been consumed.
    pub fn get(&self, timeout: Duration) -> Result<Option<Row>, GetError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if state.stopped {
                return Err(GetError::Stopped);
            }
            if let Some(row) = state.rows.pop_front() {
                drop(state);
                self.lines_read.fetch_add(1, Ordering::Relaxed);
                self.writable.notify_one();
                return Ok(Some(row));
            }
            if state.done {
                return Ok(None);
            }
            if timed_out {
                return Err(GetError::Empty);
            }
            timed_out = wait(&self.readable, &mut state, deadline);
        }
    }

    /// Non-blocking variant of [`get`](Self::get).
    pub fn try_get(&self) -> Result<Option<Row>, GetError> {
        self.get(Duration::ZERO)
    }

    /// Waits until the shape is known. Returns `Ok(None)` when the producer
    /// finished without declaring a shape or writing a single row.
    pub fn wait_for_shape(&self, timeout: Duration) -> Result<Option<Arc<RowShape>>, GetError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if state.stopped {
                return Err(GetError::Stopped);
            }
            if let Some(shape) = self.shape.get() {
                return Ok(Some(Arc::clone(shape)));
            }
            if state.done {
                return Ok(None);
            }
            if timed_out {
                return Err(GetError::Empty);
            }
            timed_out = wait(&self.readable, &mut state, deadline);
        }
    }

    /// Producer side: no more rows will be written. Irreversible.
    pub fn set_done(&self) {
        self.state.lock().done = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Forced cancellation. Wakes every waiter immediately.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Marks abnormal termination, which also stops the row set.
    pub fn set_error(&self) {
        {
            let mut state = self.state.lock();
            state.errored = true;
            state.stopped = true;
        }
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn is_errored(&self) -> bool {
        self.state.lock().errored
    }

    /// `true` once the producer is done and every row was consumed.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.done && state.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().rows.is_empty()
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    fn is_full(&self, state: &State) -> bool {
        self.capacity
            .is_some_and(|capacity| state.rows.len() >= capacity.get())
    }
}

/// Waits on `condvar`, returning `true` if the deadline passed.
fn wait(condvar: &Condvar, state: &mut MutexGuard<'_, State>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => condvar.wait_until(state, deadline).timed_out(),
        None => {
            condvar.wait(state);
            false
        }
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RowSet")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("buffered", &state.rows.len())
            .field("done", &state.done)
            .field("stopped", &state.stopped)
            .field("errored", &state.errored)
            .finish()
    }
}
