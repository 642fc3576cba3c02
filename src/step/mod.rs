//! The step contract and its runtime.
//!
//! A step is split in three parts: the immutable [`StepMeta`], the mutable
//! per-copy [`Step::Data`] created by `init`, and the [`Step`] behavior that
//! takes both as parameters. [`StepCopy`] owns one of each plus the copy's
//! [`StepIo`] and drives the `init` / `process_one_batch` / `dispose` lifecycle.

use std::{
    fmt,
    sync::atomic::{AtomicU64, AtomicU8, Ordering},
};

use rowflow_core::{LayoutError, PartitionError};
use serde::Serialize;
use snafu::Snafu;

use crate::config::StepMeta;

mod copy;
mod io;
mod registry;

pub use copy::{Drive, StepCopy};
pub use io::{IoMode, RowPoll, StepIo};
pub use registry::{StepFactory, StepRegistry};

/// Result of one `process_one_batch` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// More work may follow; call again.
    Continue,
    /// The step will not produce anything else. Its outputs are marked done.
    Done,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StepError {
    #[snafu(display("{source}"))]
    Layout { source: LayoutError },
    #[snafu(display("Partitioning failed: {source}"))]
    Partition { source: PartitionError },
    #[snafu(display("Step was cancelled"))]
    Cancelled,
    /// Cooperative execution only: the step cannot progress until another step
    /// runs. The scheduler skips it for this iteration.
    #[snafu(display("Step has no input available yet"))]
    Pending,
    #[snafu(display("Invalid configuration: {message}"))]
    Configuration { message: String },
    #[snafu(display("{message}"))]
    Failed { message: String },
    #[snafu(display("Sub-transformation failed: {message}"))]
    Nested { message: String },
}

impl StepError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A step behavior.
///
/// Implementations hold no per-copy state themselves; everything mutable lives
/// in [`Step::Data`], which exists between a successful `init` and `dispose`.
pub trait Step: Send + 'static {
    type Data: Send + 'static;

    /// Input roles the step requires, such as `head` and `tail`.
    fn input_roles(&self) -> &'static [&'static str] {
        &[]
    }

    /// Output roles the step requires.
    fn output_roles(&self) -> &'static [&'static str] {
        &[]
    }

    fn init(&self, meta: &StepMeta, io: &mut StepIo) -> Result<Self::Data, StepError>;

    fn process_one_batch(
        &self,
        meta: &StepMeta,
        data: &mut Self::Data,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError>;

    /// Releases whatever `init` acquired. Runs exactly once per initialized copy,
    /// on every exit path.
    fn dispose(&self, _meta: &StepMeta, _data: Self::Data, _io: &mut StepIo) {}
}

/// Object safe form of [`Step`] that carries its data along.
pub trait DynStep: Send {
    fn input_roles(&self) -> &'static [&'static str];

    fn output_roles(&self) -> &'static [&'static str];

    fn init(&mut self, meta: &StepMeta, io: &mut StepIo) -> Result<(), StepError>;

    fn process_one_batch(
        &mut self,
        meta: &StepMeta,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError>;

    /// Returns `true` if data was disposed, `false` if there was nothing to do.
    fn dispose(&mut self, meta: &StepMeta, io: &mut StepIo) -> bool;

    fn is_initialized(&self) -> bool;
}

pub type BoxedStep = Box<dyn DynStep>;

struct Behavior<S: Step> {
    step: S,
    data: Option<S::Data>,
}

impl<S: Step> DynStep for Behavior<S> {
    fn input_roles(&self) -> &'static [&'static str] {
        self.step.input_roles()
    }

    fn output_roles(&self) -> &'static [&'static str] {
        self.step.output_roles()
    }

    fn init(&mut self, meta: &StepMeta, io: &mut StepIo) -> Result<(), StepError> {
        if self.data.is_some() {
            return Ok(());
        }
        self.data = Some(self.step.init(meta, io)?);
        Ok(())
    }

    fn process_one_batch(
        &mut self,
        meta: &StepMeta,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        match self.data.as_mut() {
            Some(data) => self.step.process_one_batch(meta, data, io),
            None => Err(StepError::failed("step was not initialized")),
        }
    }

    fn dispose(&mut self, meta: &StepMeta, io: &mut StepIo) -> bool {
        match self.data.take() {
            Some(data) => {
                self.step.dispose(meta, data, io);
                true
            }
            None => false,
        }
    }

    fn is_initialized(&self) -> bool {
        self.data.is_some()
    }
}

pub fn boxed<S: Step>(step: S) -> BoxedStep {
    Box::new(Behavior { step, data: None })
}

/// Lifecycle state of one step copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StepState {
    Created = 0,
    Initialized = 1,
    Running = 2,
    Paused = 3,
    Finished = 4,
    Errored = 5,
    Stopped = 6,
}

impl StepState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Finished,
            5 => Self::Errored,
            6 => Self::Stopped,
            _ => Self::Created,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Stopped)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Errored => "errored",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters of one step copy, readable while the copy runs on another thread.
#[derive(Debug, Default)]
pub struct StepCounters {
    state: AtomicU8,
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    errors: AtomicU64,
}

impl StepCounters {
    pub fn state(&self) -> StepState {
        StepState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StepState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn add_read(&self) -> u64 {
        self.lines_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_written(&self, rows: u64) {
        self.lines_written.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point in time view of one step copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    pub step: String,
    pub copy: usize,
    pub state: StepState,
    pub lines_read: u64,
    pub lines_written: u64,
    pub errors: u64,
}

impl StepStatus {
    pub fn new(step: &str, copy: usize, counters: &StepCounters) -> Self {
        Self {
            step: step.to_owned(),
            copy,
            state: counters.state(),
            lines_read: counters.lines_read(),
            lines_written: counters.lines_written(),
            errors: counters.errors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_counters() {
        let counters = StepCounters::default();
        assert_eq!(counters.state(), StepState::Created);
        for state in [
            StepState::Initialized,
            StepState::Running,
            StepState::Paused,
            StepState::Finished,
            StepState::Errored,
            StepState::Stopped,
        ] {
            counters.set_state(state);
            assert_eq!(counters.state(), state);
        }
        assert!(StepState::Stopped.is_terminal());
        assert!(!StepState::Paused.is_terminal());
    }

    #[test]
    fn status_snapshot() {
        let counters = StepCounters::default();
        counters.add_read();
        counters.add_written(3);
        counters.add_error();
        let status = StepStatus::new("b", 1, &counters);
        assert_eq!(status.lines_read, 1);
        assert_eq!(status.lines_written, 3);
        assert_eq!(status.errors, 1);
        assert_eq!(
            serde_json::to_value(&status).unwrap()["state"],
            serde_json::json!("created")
        );
    }
}
