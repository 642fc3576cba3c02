use metrics::{counter, gauge};
use rowflow_core::{
    internal_event::{error_stage, error_type, InternalEvent},
    LayoutError,
};

use crate::step::StepError;

#[derive(Debug)]
pub struct StepInitialized<'a> {
    pub step: &'a str,
    pub copy: usize,
}

impl InternalEvent for StepInitialized<'_> {
    fn emit(self) {
        debug!(message = "Step initialized.", step = %self.step, copy = self.copy);
        counter!(
            "step_initializations_total",
            "step" => self.step.to_owned(),
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct StepInitFailed<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub error: &'a StepError,
}

impl InternalEvent for StepInitFailed<'_> {
    fn emit(self) {
        error!(
            message = "Step failed to initialize.",
            step = %self.step,
            copy = self.copy,
            error = %self.error,
            error_type = error_type::CONFIGURATION_FAILED,
            stage = error_stage::INITIALIZING,
        );
        counter!(
            "component_errors_total",
            "step" => self.step.to_owned(),
            "error_type" => error_type::CONFIGURATION_FAILED,
            "stage" => error_stage::INITIALIZING,
        )
        .increment(1);
    }

    fn name(&self) -> Option<&'static str> {
        Some("StepInitFailed")
    }
}

#[derive(Debug)]
pub struct StepFinished<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub lines_read: u64,
    pub lines_written: u64,
}

impl InternalEvent for StepFinished<'_> {
    fn emit(self) {
        debug!(
            message = "Step finished.",
            step = %self.step,
            copy = self.copy,
            lines_read = self.lines_read,
            lines_written = self.lines_written,
        );
        counter!("step_finished_total", "step" => self.step.to_owned()).increment(1);
    }
}

#[derive(Debug)]
pub struct StepErrored<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub error: &'a StepError,
}

impl InternalEvent for StepErrored<'_> {
    fn emit(self) {
        let error_type = match self.error {
            StepError::Layout { .. } => error_type::LAYOUT_MISMATCH,
            StepError::Configuration { .. } => error_type::CONFIGURATION_FAILED,
            StepError::Nested { .. } => error_type::SUB_TRANSFORMATION_FAILED,
            _ => error_type::PROCESSING_FAILED,
        };
        error!(
            message = "Step failed.",
            step = %self.step,
            copy = self.copy,
            error = %self.error,
            error_type,
            stage = error_stage::PROCESSING,
        );
        counter!(
            "component_errors_total",
            "step" => self.step.to_owned(),
            "error_type" => error_type,
            "stage" => error_stage::PROCESSING,
        )
        .increment(1);
    }

    fn name(&self) -> Option<&'static str> {
        Some("StepErrored")
    }
}

#[derive(Debug)]
pub struct StepStopped<'a> {
    pub step: &'a str,
    pub copy: usize,
}

impl InternalEvent for StepStopped<'_> {
    fn emit(self) {
        debug!(message = "Step stopped.", step = %self.step, copy = self.copy);
        counter!("step_stopped_total", "step" => self.step.to_owned()).increment(1);
    }
}

#[derive(Debug)]
pub struct StepProgress<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub lines_read: u64,
    pub lines_written: u64,
}

impl InternalEvent for StepProgress<'_> {
    fn emit(self) {
        info!(
            message = "Step progress.",
            step = %self.step,
            copy = self.copy,
            lines_read = self.lines_read,
            lines_written = self.lines_written,
        );
        gauge!(
            "step_lines_read",
            "step" => self.step.to_owned(),
            "copy" => self.copy.to_string(),
        )
        .set(self.lines_read as f64);
        gauge!(
            "step_lines_written",
            "step" => self.step.to_owned(),
            "copy" => self.copy.to_string(),
        )
        .set(self.lines_written as f64);
    }
}

#[derive(Debug)]
pub struct RowsetsStopped<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub count: usize,
    pub errored: bool,
}

impl InternalEvent for RowsetsStopped<'_> {
    fn emit(self) {
        debug!(
            message = "Stopped row sets of step.",
            step = %self.step,
            copy = self.copy,
            count = self.count,
            errored = self.errored,
        );
    }
}

#[derive(Debug)]
pub struct LayoutMismatch<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub error: &'a LayoutError,
}

impl InternalEvent for LayoutMismatch<'_> {
    fn emit(self) {
        error!(
            message = "Incompatible row layouts on merged streams.",
            step = %self.step,
            copy = self.copy,
            error = %self.error,
            error_type = error_type::LAYOUT_MISMATCH,
            stage = error_stage::PROCESSING,
        );
        counter!(
            "layout_mismatches_total",
            "step" => self.step.to_owned(),
        )
        .increment(1);
    }

    fn name(&self) -> Option<&'static str> {
        Some("LayoutMismatch")
    }
}
