use std::{sync::Arc, time::Duration};

use super::{BatchOutcome, BoxedStep, StepCounters, StepError, StepIo, StepState, StepStatus};
use crate::{
    config::StepMeta,
    internal_events::{StepErrored, StepFinished, StepInitFailed, StepInitialized, StepStopped},
};

const PENDING_BACKOFF: Duration = Duration::from_millis(1);

/// What a scheduler should do after driving a copy once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drive {
    /// The batch made progress; drive again.
    Continue,
    /// Nothing to do until another step runs.
    Pending,
    /// The copy reached a terminal state and must not be driven again.
    Terminal(StepState),
}

/// One running instance of a step: its behavior, its data and its row sets.
pub struct StepCopy {
    meta: Arc<StepMeta>,
    copy: usize,
    behavior: BoxedStep,
    io: StepIo,
}

impl StepCopy {
    pub(crate) fn new(meta: Arc<StepMeta>, copy: usize, behavior: BoxedStep, io: StepIo) -> Self {
        Self {
            meta,
            copy,
            behavior,
            io,
        }
    }

    pub fn meta(&self) -> &Arc<StepMeta> {
        &self.meta
    }

    pub fn step(&self) -> &str {
        &self.meta.name
    }

    pub const fn copy(&self) -> usize {
        self.copy
    }

    pub fn io(&self) -> &StepIo {
        &self.io
    }

    pub(crate) fn io_mut(&mut self) -> &mut StepIo {
        &mut self.io
    }

    pub fn counters(&self) -> &Arc<StepCounters> {
        self.io.counters()
    }

    pub fn state(&self) -> StepState {
        self.counters().state()
    }

    pub fn status(&self) -> StepStatus {
        StepStatus::new(&self.meta.name, self.copy, self.counters())
    }

    /// Runs the step's `init`. A failure leaves nothing to dispose.
    pub fn init(&mut self) -> Result<(), StepError> {
        match self.behavior.init(&self.meta, &mut self.io) {
            Ok(()) => {
                self.counters().set_state(StepState::Initialized);
                emit!(StepInitialized {
                    step: &self.meta.name,
                    copy: self.copy,
                });
                Ok(())
            }
            Err(error) => {
                emit!(StepInitFailed {
                    step: &self.meta.name,
                    copy: self.copy,
                    error: &error,
                });
                self.counters().add_error();
                self.counters().set_state(StepState::Errored);
                Err(error)
            }
        }
    }

    /// One raw call of the step's `process_one_batch`, without any bookkeeping.
    pub fn process_one_batch(&mut self) -> Result<BatchOutcome, StepError> {
        self.behavior.process_one_batch(&self.meta, &mut self.io)
    }

    /// Processes one batch and applies its outcome to the copy state and row sets.
    pub fn drive(&mut self) -> Drive {
        let state = self.state();
        if state.is_terminal() {
            return Drive::Terminal(state);
        }
        if self.io.control().is_stopped() {
            return self.cancel();
        }
        if state != StepState::Running {
            self.counters().set_state(StepState::Running);
        }

        match self.process_one_batch() {
            Ok(BatchOutcome::Continue) => Drive::Continue,
            Ok(BatchOutcome::Done) => self.finish(),
            Err(StepError::Pending) => Drive::Pending,
            Err(error) if error.is_cancelled() => self.cancel(),
            Err(error) => self.fail(error),
        }
    }

    fn finish(&mut self) -> Drive {
        self.io.set_output_done();
        self.counters().set_state(StepState::Finished);
        emit!(StepFinished {
            step: &self.meta.name,
            copy: self.copy,
            lines_read: self.counters().lines_read(),
            lines_written: self.counters().lines_written(),
        });
        Drive::Terminal(StepState::Finished)
    }

    fn cancel(&mut self) -> Drive {
        self.io.stop_all_rowsets(false);
        self.counters().set_state(StepState::Stopped);
        emit!(StepStopped {
            step: &self.meta.name,
            copy: self.copy,
        });
        Drive::Terminal(StepState::Stopped)
    }

    /// Marks the copy failed and stops the whole run.
    pub(crate) fn fail(&mut self, error: StepError) -> Drive {
        self.counters().add_error();
        emit!(StepErrored {
            step: &self.meta.name,
            copy: self.copy,
            error: &error,
        });
        self.io.stop_all_rowsets(true);
        self.counters().set_state(StepState::Errored);
        self.io
            .control()
            .record_error(&self.meta.name, self.copy, error.to_string());
        Drive::Terminal(StepState::Errored)
    }

    /// Worker loop of the thread scheduler. Disposes the copy on every exit path.
    pub fn run(mut self) -> StepStatus {
        let control = self.io.control().clone();
        let poll_interval = self.io.poll_interval();
        loop {
            if control.is_paused() && !control.is_stopped() {
                self.counters().set_state(StepState::Paused);
                control.wait_while_paused(poll_interval);
                continue;
            }
            match self.drive() {
                Drive::Continue => {}
                Drive::Pending => control.idle(PENDING_BACKOFF),
                Drive::Terminal(_) => break,
            }
        }
        self.dispose();
        self.status()
    }

    /// Releases the step data. Safe to call more than once.
    pub fn dispose(&mut self) -> bool {
        let disposed = self.behavior.dispose(&self.meta, &mut self.io);
        if disposed {
            debug!(message = "Step disposed.", step = %self.meta.name, copy = self.copy);
        }
        disposed
    }

    pub fn is_initialized(&self) -> bool {
        self.behavior.is_initialized()
    }

    pub fn input_roles(&self) -> &'static [&'static str] {
        self.behavior.input_roles()
    }

    pub fn output_roles(&self) -> &'static [&'static str] {
        self.behavior.output_roles()
    }
}

impl std::fmt::Debug for StepCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCopy")
            .field("step", &self.meta.name)
            .field("copy", &self.copy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
