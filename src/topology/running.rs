use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

use chrono::{DateTime, Utc};
use snafu::{IntoError, ResultExt};

use super::{
    builder::{build_pieces, Pieces},
    report_undrained, run_result, BuildSnafu, ExecutionError, ExecutionMode, RunResult,
    SpawnSnafu, StartupSnafu, TransState,
};
use crate::{
    config::TransformationConfig,
    context::{RunControl, TransContext},
    internal_events::{TransformationFinished, TransformationStarted, TransformationStopping},
    step::{StepCopy, StepCounters, StepError, StepState, StepStatus},
};

struct Worker {
    step: String,
    copy: usize,
    counters: Arc<StepCounters>,
    handle: Option<JoinHandle<StepStatus>>,
}

/// A transformation run by the thread scheduler: one OS thread per step copy.
///
/// Lifecycle: [`prepare`](Self::prepare), [`init_steps`](Self::init_steps),
/// [`start_threads`](Self::start_threads), then
/// [`wait_until_finished`](Self::wait_until_finished). Dropping a transformation
/// stops it and disposes every copy that was initialized.
pub struct Transformation {
    context: TransContext,
    copies: Vec<StepCopy>,
    workers: Vec<Worker>,
    started: Option<(DateTime<Utc>, Instant)>,
    result: Option<RunResult>,
}

impl Transformation {
    pub fn prepare(
        config: &TransformationConfig,
        context: TransContext,
    ) -> Result<Self, ExecutionError> {
        let pieces = build_pieces(config, context, ExecutionMode::Threaded)
            .map_err(|errors| BuildSnafu { errors }.build())?;
        Ok(Self::from_pieces(pieces))
    }

    pub fn from_pieces(pieces: Pieces) -> Self {
        let workers = pieces
            .copies
            .iter()
            .map(|copy| Worker {
                step: copy.step().to_owned(),
                copy: copy.copy(),
                counters: Arc::clone(copy.counters()),
                handle: None,
            })
            .collect();
        Self {
            context: pieces.context,
            copies: pieces.copies,
            workers,
            started: None,
            result: None,
        }
    }

    /// Prepares, initializes, runs and waits for a transformation.
    pub fn execute(
        config: &TransformationConfig,
        context: TransContext,
    ) -> Result<RunResult, ExecutionError> {
        let mut transformation = Self::prepare(config, context)?;
        transformation.init_steps()?;
        transformation.start_threads()?;
        Ok(transformation.wait_until_finished())
    }

    pub const fn context(&self) -> &TransContext {
        &self.context
    }

    pub const fn control(&self) -> &RunControl {
        self.context.control()
    }

    /// Initializes every copy concurrently. If any copy fails, the copies that
    /// succeeded are disposed and no worker is started.
    pub fn init_steps(&mut self) -> Result<(), ExecutionError> {
        let results = thread::scope(|scope| {
            let handles = self
                .copies
                .iter_mut()
                .map(|copy| scope.spawn(move || copy.init()))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(StepError::failed("step init panicked")))
                })
                .collect::<Vec<_>>()
        });

        let failure = self
            .copies
            .iter()
            .zip(results)
            .find_map(|(copy, result)| {
                result
                    .err()
                    .map(|error| (copy.step().to_owned(), copy.copy(), error))
            });
        let Some((step, copy, source)) = failure else {
            return Ok(());
        };

        self.control().record_error(&step, copy, source.to_string());
        for copy in &mut self.copies {
            copy.dispose();
        }
        Err(StartupSnafu { step, copy }.into_error(source))
    }

    /// Spawns one named worker thread per copy.
    pub fn start_threads(&mut self) -> Result<(), ExecutionError> {
        emit!(TransformationStarted {
            name: self.context.name(),
            copies: self.copies.len(),
        });
        self.started = Some((Utc::now(), Instant::now()));

        let copies = std::mem::take(&mut self.copies);
        let mut remaining = copies.into_iter();
        for copy in remaining.by_ref() {
            let worker = self
                .workers
                .iter_mut()
                .find(|worker| worker.step == copy.step() && worker.copy == copy.copy());
            let span = info_span!("step", step = %copy.step(), copy = copy.copy());
            let spawned = thread::Builder::new()
                .name(format!("{}.{}", copy.step(), copy.copy()))
                .spawn(move || span.in_scope(|| copy.run()))
                .context(SpawnSnafu);
            match (spawned, worker) {
                (Ok(handle), Some(worker)) => worker.handle = Some(handle),
                (Ok(_), None) => {}
                (Err(error), _) => {
                    self.context.control().abort();
                    for mut copy in remaining {
                        copy.dispose();
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Joins every worker and reports the outcome. Returns the same result when
    /// called again.
    pub fn wait_until_finished(&mut self) -> RunResult {
        if let Some(result) = &self.result {
            return result.clone();
        }

        if self.started.is_none() && self.control().error_count() == 0 {
            self.control().stop();
        }
        for copy in &mut self.copies {
            copy.dispose();
        }
        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            if handle.join().is_err() {
                worker.counters.set_state(StepState::Errored);
                self.context.control().record_error(
                    &worker.step,
                    worker.copy,
                    "step thread panicked".to_owned(),
                );
            }
        }

        let (started_at, started) = self.started.unwrap_or_else(|| (Utc::now(), Instant::now()));
        let result = run_result(
            self.context.name(),
            self.context.control(),
            self.step_status(),
            started_at,
        );
        if result.state == TransState::Finished {
            report_undrained(self.context.control());
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

    /// Requests a stop. Workers exit within one poll interval and dispose their steps.
    pub fn stop(&self) {
        emit!(TransformationStopping {
            name: self.context.name(),
        });
        self.context.stop();
    }

    /// Parks every worker between two batches.
    pub fn pause_running_transformation(&self) {
        self.control().pause();
    }

    pub fn resume_running_transformation(&self) {
        self.control().resume();
    }

    /// Whether every worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.started.is_some()
            && self.workers.iter().all(|worker| {
                worker
                    .handle
                    .as_ref()
                    .is_none_or(JoinHandle::is_finished)
            })
    }

    pub fn state(&self) -> TransState {
        if let Some(result) = &self.result {
            return result.state;
        }
        let control = self.control();
        match (self.started.is_some(), self.is_finished()) {
            (false, _) => TransState::Init,
            (true, true) if control.error_count() > 0 => TransState::Errored,
            (true, true) if control.is_cancelled() => TransState::Stopped,
            (true, true) => TransState::Finished,
            (true, false) if control.is_stopped() => TransState::Stopping,
            (true, false) if control.is_paused() => TransState::Paused,
            (true, false) => TransState::Running,
        }
    }

    /// Snapshot of every copy, readable while the workers run.
    pub fn step_status(&self) -> Vec<StepStatus> {
        self.workers
            .iter()
            .map(|worker| StepStatus::new(&worker.step, worker.copy, &worker.counters))
            .collect()
    }

    /// Stops a running transformation and waits for it, or disposes the copies of
    /// one that never started.
    pub fn shutdown(&mut self) -> RunResult {
        if self.started.is_some() && self.result.is_none() && !self.is_finished() {
            self.stop();
        }
        self.wait_until_finished()
    }
}

impl Drop for Transformation {
    fn drop(&mut self) {
        if self.result.is_none() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for Transformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformation")
            .field("name", &self.context.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
