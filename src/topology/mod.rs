//! Topology turns a [`TransformationConfig`](crate::config::TransformationConfig)
//! into running step copies.
//!
//! [`builder`] wires copies and row sets. The result is either handed to
//! [`Transformation`], which runs one OS thread per copy, or to
//! [`SingleThreadedExecutor`], which drives every copy from the caller's thread.

pub mod builder;
mod running;
mod single_threaded;

#[cfg(test)]
mod test;

use std::{fmt, io};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

pub use builder::{build_pieces, Pieces};
pub use running::Transformation;
pub use single_threaded::SingleThreadedExecutor;

use crate::{
    context::FailedStep,
    step::{StepError, StepStatus},
};

/// How the step copies of a transformation are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One thread per step copy, bounded row sets.
    #[default]
    Threaded,
    /// Round-robin on the caller's thread, unbounded row sets.
    SingleThreaded,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExecutionError {
    #[snafu(display("Transformation could not be built:\n{}", errors.join("\n")))]
    Build { errors: Vec<String> },
    #[snafu(display("Step {step:?} copy {copy} failed to initialize: {source}"))]
    Startup {
        step: String,
        copy: usize,
        source: StepError,
    },
    #[snafu(display("Step {step:?} copy {copy} failed: {message}"))]
    Run {
        step: String,
        copy: usize,
        message: String,
    },
    #[snafu(display("Transformation was stopped before it finished"))]
    Cancelled,
    #[snafu(display("Unable to spawn step thread: {source}"))]
    Spawn { source: io::Error },
}

/// Lifecycle state of a whole transformation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransState {
    Init,
    Running,
    Paused,
    Stopping,
    Stopped,
    Finished,
    Errored,
}

impl TransState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for TransState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub name: String,
    pub state: TransState,
    pub errors: u64,
    pub first_error: Option<FailedStep>,
    pub steps: Vec<StepStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub const fn is_success(&self) -> bool {
        matches!(self.state, TransState::Finished) && self.errors == 0
    }

    /// Statuses of every copy of `step`, in copy order.
    pub fn step(&self, step: &str) -> impl Iterator<Item = &StepStatus> {
        self.steps.iter().filter(move |status| status.step == step)
    }

    /// Rows written by all copies of `step`.
    pub fn lines_written(&self, step: &str) -> u64 {
        self.step(step).map(|status| status.lines_written).sum()
    }

    pub fn lines_read(&self, step: &str) -> u64 {
        self.step(step).map(|status| status.lines_read).sum()
    }

    pub fn into_result(self) -> Result<Self, ExecutionError> {
        if let Some(failed) = &self.first_error {
            return RunSnafu {
                step: failed.step.clone(),
                copy: failed.copy,
                message: failed.message.clone(),
            }
            .fail();
        }
        if self.state == TransState::Stopped {
            return CancelledSnafu.fail();
        }
        Ok(self)
    }
}

fn run_result(
    name: &str,
    control: &crate::context::RunControl,
    steps: Vec<StepStatus>,
    started_at: DateTime<Utc>,
) -> RunResult {
    let errors = control.error_count();
    let state = if errors > 0 {
        TransState::Errored
    } else if control.is_cancelled() {
        TransState::Stopped
    } else {
        TransState::Finished
    };
    RunResult {
        name: name.to_owned(),
        state,
        errors,
        first_error: control.first_error(),
        steps,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Logs row sets still holding rows once every copy is gone.
fn report_undrained(control: &crate::context::RunControl) {
    for rowset in control.rowsets() {
        let buffered = rowset.len();
        if buffered > 0 {
            emit!(crate::internal_events::RowSetNotDrained {
                id: rowset.id(),
                buffered,
            });
        }
    }
}
