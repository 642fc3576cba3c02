//! The `mapping` step: a sub-transformation embedded in one step.
//!
//! Every copy of the step builds its own nested run when initialized. Rows read
//! by the step are relayed into the nested `mapping_input` steps through extra
//! row sets attached to them; rows written by the nested `mapping_output` steps
//! come back the same way and are written to the step's outputs. The nested run
//! is registered with the parent transformation while it exists.

use std::{sync::Arc, time::Duration};

use rowflow_core::{GetError, PutError, RowSet};

use crate::{
    config::StepMeta,
    step::{BatchOutcome, RowPoll, Step, StepError, StepIo},
    topology::{
        build_pieces, builder::new_rowset, ExecutionError, ExecutionMode, RunResult,
        SingleThreadedExecutor, TransState, Transformation,
    },
};

mod config;

pub use config::{InputMapping, MappingConfig, OutputMapping, Route, MAPPING_INPUT, MAPPING_OUTPUT};

/// Runs a sub-transformation for every copy.
#[derive(Debug)]
pub struct Mapping {
    config: MappingConfig,
}

impl Mapping {
    pub const fn new(config: MappingConfig) -> Self {
        Self { config }
    }
}

enum Runner {
    Threaded(Transformation),
    SingleThreaded(SingleThreadedExecutor),
}

impl Runner {
    fn finish(&mut self) -> RunResult {
        match self {
            Self::Threaded(transformation) => transformation.shutdown(),
            Self::SingleThreaded(executor) => executor.dispose(),
        }
    }
}

/// Rows from the outer inputs to the copies of one nested step.
struct InputRelay {
    outer: Option<String>,
    relays: Vec<Arc<RowSet>>,
    cursor: usize,
    done: bool,
}

/// Rows from the copies of one nested step to the outer outputs.
struct OutputRelay {
    outer: Option<String>,
    relays: Vec<Arc<RowSet>>,
}

pub struct MappingData {
    runner: Runner,
    inputs: Vec<InputRelay>,
    outputs: Vec<OutputRelay>,
    relay_size: usize,
    started: bool,
    registered: Option<String>,
}

impl std::fmt::Debug for MappingData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingData")
            .field("started", &self.started)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

fn nested_error(error: &ExecutionError) -> StepError {
    StepError::Nested {
        message: error.to_string(),
    }
}

impl MappingData {
    /// Moves available outer rows into the input relays. Returns the number moved.
    fn pump_inputs(&mut self, io: &mut StepIo) -> Result<usize, StepError> {
        let mut moved = 0;
        for input in &mut self.inputs {
            while !input.done && !input.relays.is_empty() {
                let relay = &input.relays[input.cursor % input.relays.len()];
                if relay.len() >= self.relay_size {
                    break;
                }
                let polled = match &input.outer {
                    Some(step) => io.poll_row_from(step)?,
                    None => io.poll_row()?,
                };
                let row = match polled {
                    RowPoll::Row(row) => row,
                    RowPoll::Pending => break,
                    RowPoll::Done => {
                        input.relays.iter().for_each(|relay| relay.set_done());
                        input.done = true;
                        break;
                    }
                };
                let Some(shape) = io.last_input_shape().cloned() else {
                    return Err(StepError::failed("row read without a known shape"));
                };
                match relay.put(&shape, row, Duration::ZERO) {
                    Ok(()) => {}
                    Err(PutError::ShapeMismatch { source, .. }) => {
                        return Err(StepError::Layout { source });
                    }
                    // The nested run stopped; its outcome is reported once it is joined.
                    Err(_) => {
                        input.done = true;
                        break;
                    }
                }
                input.cursor = input.cursor.wrapping_add(1);
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Runs the nested transformation a bit. Returns whether it has finished.
    fn drive_nested(&mut self, progressed: &mut bool) -> Result<bool, StepError> {
        match &mut self.runner {
            Runner::SingleThreaded(executor) => {
                let before = executor.progress();
                let unfinished = executor.one_iteration();
                *progressed |= executor.progress() != before;
                Ok(!unfinished)
            }
            Runner::Threaded(transformation) => {
                if !self.started {
                    transformation
                        .start_threads()
                        .map_err(|error| nested_error(&error))?;
                    self.started = true;
                    *progressed = true;
                }
                Ok(transformation.is_finished())
            }
        }
    }

    /// Writes the rows waiting in the output relays. Returns the number moved and
    /// whether every relay is exhausted.
    fn drain_outputs(&mut self, io: &mut StepIo) -> Result<(usize, bool), StepError> {
        let mut moved = 0;
        let mut exhausted = true;
        for output in &self.outputs {
            for relay in &output.relays {
                loop {
                    match relay.try_get() {
                        Ok(Some(row)) => {
                            let Some(shape) = relay.shape().cloned() else {
                                return Err(StepError::failed("relayed row without a shape"));
                            };
                            match &output.outer {
                                Some(target) => io.put_row_to_shaped(target, &shape, row)?,
                                None => io.put_row_shaped(&shape, row)?,
                            }
                            moved += 1;
                        }
                        Ok(None) | Err(GetError::Stopped) => break,
                        Err(GetError::Empty) => {
                            exhausted = false;
                            break;
                        }
                    }
                }
            }
        }
        Ok((moved, exhausted))
    }
}

impl Step for Mapping {
    type Data = MappingData;

    fn init(&self, meta: &StepMeta, io: &mut StepIo) -> Result<MappingData, StepError> {
        let input_routes = self.config.input_routes(meta)?;
        let output_routes = self.config.output_routes(meta)?;

        let mode = self.config.execution;
        let context = io.context().nested(&self.config.transformation);
        let mut pieces = build_pieces(&self.config.transformation, context.clone(), mode)
            .map_err(|errors| StepError::configuration(errors.join(" ")))?;
        let relay_size = context.options().rowset_size.max(1);

        let mut inputs = Vec::with_capacity(input_routes.len());
        for route in input_routes {
            let copies = pieces.meta(&route.nested).map_or(0, |meta| meta.copies);
            let relays = (0..copies)
                .map(|copy| {
                    let relay = new_rowset(
                        mode,
                        relay_size,
                        (&meta.name, io.copy()),
                        (&route.nested, copy),
                    );
                    pieces.attach_input(&route.nested, copy, Arc::clone(&relay));
                    relay
                })
                .collect();
            inputs.push(InputRelay {
                outer: route.outer,
                relays,
                cursor: 0,
                done: false,
            });
        }

        let mut outputs = Vec::with_capacity(output_routes.len());
        for route in output_routes {
            let copies = pieces.meta(&route.nested).map_or(0, |meta| meta.copies);
            let relays = (0..copies)
                .map(|copy| {
                    let relay = new_rowset(
                        mode,
                        relay_size,
                        (&route.nested, copy),
                        (&meta.name, io.copy()),
                    );
                    pieces.attach_output(&route.nested, copy, &meta.name, Arc::clone(&relay));
                    relay
                })
                .collect();
            outputs.push(OutputRelay {
                outer: route.outer,
                relays,
            });
        }

        let runner = match mode {
            ExecutionMode::Threaded => {
                let mut transformation = Transformation::from_pieces(pieces);
                transformation
                    .init_steps()
                    .map_err(|error| nested_error(&error))?;
                Runner::Threaded(transformation)
            }
            ExecutionMode::SingleThreaded => {
                let mut executor = SingleThreadedExecutor::new(pieces);
                executor.init().map_err(|error| nested_error(&error))?;
                Runner::SingleThreaded(executor)
            }
        };

        let key = format!("{}.{}", meta.name, io.copy());
        let registered = if io.context().sub_transformations().add(&key, context) {
            Some(key)
        } else {
            warn!(message = "Sub-transformation key is already in use.", %key);
            None
        };
        Ok(MappingData {
            runner,
            inputs,
            outputs,
            relay_size,
            started: false,
            registered,
        })
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        data: &mut MappingData,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        let mut progressed = data.pump_inputs(io)? > 0;
        let finished = data.drive_nested(&mut progressed)?;
        let (moved, exhausted) = data.drain_outputs(io)?;
        progressed |= moved > 0;

        if finished && exhausted {
            let result = data.runner.finish();
            return match (result.state, result.first_error) {
                (_, Some(failed)) => Err(StepError::Nested {
                    message: failed.to_string(),
                }),
                (TransState::Stopped, None) => Err(StepError::Cancelled),
                _ => Ok(BatchOutcome::Done),
            };
        }

        if progressed {
            Ok(BatchOutcome::Continue)
        } else {
            Err(StepError::Pending)
        }
    }

    fn dispose(&self, _meta: &StepMeta, mut data: MappingData, io: &mut StepIo) {
        data.runner.finish();
        if let Some(key) = data.registered.take() {
            io.context().sub_transformations().remove(&key);
        }
    }
}
