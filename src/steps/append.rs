use std::sync::Arc;

use crate::{
    config::StepMeta,
    internal_events::LayoutMismatch,
    step::{BatchOutcome, Step, StepError, StepIo},
};

const HEAD: &str = "head";
const TAIL: &str = "tail";

/// Emits every row of the `head` input, then every row of the `tail` input.
///
/// The shapes of both inputs are compared before the first tail row is read; a
/// mismatch fails the step without writing any tail row.
#[derive(Clone, Copy, Debug, Default)]
pub struct Append;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Head,
    CheckTail,
    Tail,
}

#[derive(Debug)]
pub struct AppendData {
    head: String,
    tail: String,
    phase: Phase,
}

fn resolve_role(meta: &StepMeta, io: &StepIo, role: &str) -> Result<String, StepError> {
    let Some(step) = meta.input_role(role) else {
        return Err(StepError::configuration(format!(
            "no step is assigned to the {role:?} input"
        )));
    };
    if !io.has_input_from(step) {
        return Err(StepError::configuration(format!(
            "the {role:?} input {step:?} is not connected"
        )));
    }
    Ok(step.to_owned())
}

impl Step for Append {
    type Data = AppendData;

    fn input_roles(&self) -> &'static [&'static str] {
        &[HEAD, TAIL]
    }

    fn init(&self, meta: &StepMeta, io: &mut StepIo) -> Result<AppendData, StepError> {
        let head = resolve_role(meta, io, HEAD)?;
        let tail = resolve_role(meta, io, TAIL)?;
        if head == tail {
            return Err(StepError::configuration(format!(
                "{head:?} can't be both the head and the tail input"
            )));
        }
        Ok(AppendData {
            head,
            tail,
            phase: Phase::Head,
        })
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        data: &mut AppendData,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        match data.phase {
            Phase::Head => {
                match io.get_row_from(&data.head)? {
                    Some(row) => io.put_row(row)?,
                    None => data.phase = Phase::CheckTail,
                }
                Ok(BatchOutcome::Continue)
            }
            Phase::CheckTail => {
                let head = io.input_shape_from(&data.head)?;
                let tail = io.input_shape_from(&data.tail)?;
                if let (Some(head), Some(tail)) = (&head, &tail) {
                    if let Err(error) = head.check_compatible(tail) {
                        emit!(LayoutMismatch {
                            step: io.step(),
                            copy: io.copy(),
                            error: &error,
                        });
                        return Err(StepError::Layout { source: error });
                    }
                }
                if let Some(shape) = head.or(tail) {
                    if io.output_shape().is_none() {
                        io.set_output_shape(Arc::clone(&shape));
                    }
                }
                data.phase = Phase::Tail;
                Ok(BatchOutcome::Continue)
            }
            Phase::Tail => match io.get_row_from(&data.tail)? {
                Some(row) => {
                    io.put_row(row)?;
                    Ok(BatchOutcome::Continue)
                }
                None => Ok(BatchOutcome::Done),
            },
        }
    }
}
