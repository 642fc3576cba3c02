use std::time::Instant;

use chrono::{DateTime, Utc};
use snafu::IntoError;

use super::{
    builder::{build_pieces, Pieces},
    report_undrained, run_result, BuildSnafu, ExecutionError, ExecutionMode, RunResult,
    StartupSnafu, TransState,
};
use crate::{
    config::TransformationConfig,
    context::{RunControl, TransContext},
    internal_events::{TransformationFinished, TransformationStarted, TransformationStopping},
    step::{Drive, StepCopy, StepStatus},
};

/// Drives every step copy of a transformation from the caller's thread.
///
/// Copies run in the topological order fixed at build time. Row sets are
/// unbounded and reads never wait, so a call to
/// [`one_iteration`](Self::one_iteration) never blocks: a copy without input
/// is skipped until the next iteration.
pub struct SingleThreadedExecutor {
    context: TransContext,
    copies: Vec<StepCopy>,
    iterations: u64,
    started: Option<(DateTime<Utc>, Instant)>,
    result: Option<RunResult>,
}

impl SingleThreadedExecutor {
    pub fn new(pieces: Pieces) -> Self {
        if pieces.mode != ExecutionMode::SingleThreaded {
            warn!(
                message = "Pieces built for threaded execution are driven by the single-threaded executor.",
                transformation = %pieces.context.name(),
            );
        }
        Self {
            context: pieces.context,
            copies: pieces.copies,
            iterations: 0,
            started: None,
            result: None,
        }
    }

    pub fn prepare(
        config: &TransformationConfig,
        context: TransContext,
    ) -> Result<Self, ExecutionError> {
        let pieces = build_pieces(config, context, ExecutionMode::SingleThreaded)
            .map_err(|errors| BuildSnafu { errors }.build())?;
        Ok(Self::new(pieces))
    }

    /// Prepares, initializes and drives a transformation until it is done.
    pub fn execute(
        config: &TransformationConfig,
        context: TransContext,
    ) -> Result<RunResult, ExecutionError> {
        let mut executor = Self::prepare(config, context)?;
        executor.init()?;
        Ok(executor.run_to_completion())
    }

    pub const fn context(&self) -> &TransContext {
        &self.context
    }

    pub const fn control(&self) -> &RunControl {
        self.context.control()
    }

    /// Number of iterations driven so far.
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Rows read plus rows written by every copy so far. Grows whenever an
    /// iteration moved any row.
    pub fn progress(&self) -> u64 {
        self.copies
            .iter()
            .map(|copy| copy.counters().lines_read() + copy.counters().lines_written())
            .sum()
    }

    /// Initializes every copy in order. Stops at the first failure and disposes
    /// the copies initialized before it.
    pub fn init(&mut self) -> Result<(), ExecutionError> {
        let mut failure = None;
        for copy in &mut self.copies {
            if let Err(error) = copy.init() {
                failure = Some((copy.step().to_owned(), copy.copy(), error));
                break;
            }
        }
        let Some((step, copy, source)) = failure else {
            emit!(TransformationStarted {
                name: self.context.name(),
                copies: self.copies.len(),
            });
            self.started = Some((Utc::now(), Instant::now()));
            return Ok(());
        };

        self.control().record_error(&step, copy, source.to_string());
        for copy in &mut self.copies {
            copy.dispose();
        }
        Err(StartupSnafu { step, copy }.into_error(source))
    }

    /// Drives one batch of every unfinished copy, in order.
    ///
    /// Returns `true` while some copy has not reached a terminal state. A stopped
    /// run returns `false` once every copy observed the stop. A paused run
    /// returns `true` right away without driving anything.
    pub fn one_iteration(&mut self) -> bool {
        if self.result.is_some() {
            return false;
        }
        if self.control().is_paused() && !self.control().is_stopped() {
            return true;
        }

        self.iterations += 1;
        let mut unfinished = false;
        for copy in &mut self.copies {
            match copy.drive() {
                Drive::Continue | Drive::Pending => unfinished = true,
                Drive::Terminal(_) => {}
            }
        }
        unfinished
    }

    /// Calls [`one_iteration`](Self::one_iteration) until it returns `false`,
    /// then disposes every copy. Parks between iterations while the run is paused.
    pub fn run_to_completion(&mut self) -> RunResult {
        let poll_interval = self.context.options().poll_interval();
        while self.one_iteration() {
            self.control().wait_while_paused(poll_interval);
        }
        self.dispose()
    }

    /// Stops the run. Copies observe it on their next drive.
    pub fn stop(&self) {
        emit!(TransformationStopping {
            name: self.context.name(),
        });
        self.context.stop();
    }

    pub fn step_status(&self) -> Vec<StepStatus> {
        self.copies.iter().map(StepCopy::status).collect()
    }

    pub fn state(&self) -> TransState {
        if let Some(result) = &self.result {
            return result.state;
        }
        let control = self.control();
        if self.started.is_none() {
            TransState::Init
        } else if control.is_stopped() {
            TransState::Stopping
        } else if control.is_paused() {
            TransState::Paused
        } else {
            TransState::Running
        }
    }

    /// Disposes every copy and reports the outcome. Safe to call more than once.
    pub fn dispose(&mut self) -> RunResult {
        if let Some(result) = &self.result {
            return result.clone();
        }

        if self.copies.iter().any(|copy| !copy.state().is_terminal())
            && self.control().error_count() == 0
        {
            self.control().stop();
        }
        for copy in &mut self.copies {
            copy.dispose();
        }

        let (started_at, started) = self.started.unwrap_or_else(|| (Utc::now(), Instant::now()));
        let result = run_result(
            self.context.name(),
            self.control(),
            self.step_status(),
            started_at,
        );
        if result.state == TransState::Finished {
            report_undrained(self.control());
        }
        emit!(TransformationFinished {
            name: self.context.name(),
            state: result.state,
            errors: result.errors,
            elapsed: started.elapsed(),
        });
        self.result = Some(result.clone());
        result
    }
}

impl Drop for SingleThreadedExecutor {
    fn drop(&mut self) {
        if self.result.is_none() {
            self.dispose();
        }
    }
}

impl std::fmt::Debug for SingleThreadedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadedExecutor")
            .field("name", &self.context.name())
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
