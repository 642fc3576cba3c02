use std::time::Duration;

use metrics::{counter, histogram};
use rowflow_core::{internal_event::InternalEvent, RowSetId};

use crate::topology::TransState;

#[derive(Debug)]
pub struct TransformationStarted<'a> {
    pub name: &'a str,
    pub copies: usize,
}

impl InternalEvent for TransformationStarted<'_> {
    fn emit(self) {
        info!(
            message = "Transformation started.",
            transformation = %self.name,
            copies = self.copies,
        );
        counter!("transformations_started_total").increment(1);
    }
}

#[derive(Debug)]
pub struct TransformationStopping<'a> {
    pub name: &'a str,
}

impl InternalEvent for TransformationStopping<'_> {
    fn emit(self) {
        info!(message = "Stopping transformation.", transformation = %self.name);
    }
}

#[derive(Debug)]
pub struct TransformationFinished<'a> {
    pub name: &'a str,
    pub state: TransState,
    pub errors: u64,
    pub elapsed: Duration,
}

impl InternalEvent for TransformationFinished<'_> {
    fn emit(self) {
        if self.errors > 0 {
            error!(
                message = "Transformation finished with errors.",
                transformation = %self.name,
                state = %self.state,
                errors = self.errors,
                elapsed_ms = self.elapsed.as_millis() as u64,
            );
        } else {
            info!(
                message = "Transformation finished.",
                transformation = %self.name,
                state = %self.state,
                elapsed_ms = self.elapsed.as_millis() as u64,
            );
        }
        counter!(
            "transformations_finished_total",
            "state" => self.state.as_str(),
        )
        .increment(1);
        histogram!("transformation_duration_seconds").record(self.elapsed.as_secs_f64());
    }

    fn name(&self) -> Option<&'static str> {
        Some("TransformationFinished")
    }
}

#[derive(Debug)]
pub struct RowSetNotDrained<'a> {
    pub id: &'a RowSetId,
    pub buffered: usize,
}

impl InternalEvent for RowSetNotDrained<'_> {
    fn emit(self) {
        warn!(
            message = "Row set still holds rows after the transformation finished.",
            rowset = %self.id,
            buffered = self.buffered,
        );
    }
}
