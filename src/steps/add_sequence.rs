use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use rowflow_core::{ColumnMeta, RowShape, ValueType};
use serde::{Deserialize, Serialize};

use crate::{
    config::StepMeta,
    context::ResourceKey,
    step::{BatchOutcome, Step, StepError, StepIo},
};

const RESOURCE_GROUP: &str = "sequence";

fn default_field_name() -> String {
    "valuename".to_owned()
}

const fn default_one() -> i64 {
    1
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AddSequenceConfig {
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_one")]
    pub start: i64,
    #[serde(default = "default_one")]
    pub increment: i64,
    /// Name of a counter shared by every step, within one partition, that uses it.
    /// Without it each copy counts on its own.
    #[serde(default)]
    pub shared_counter: Option<String>,
}

impl Default for AddSequenceConfig {
    fn default() -> Self {
        Self {
            field_name: default_field_name(),
            start: 1,
            increment: 1,
            shared_counter: None,
        }
    }
}

/// Appends an integer sequence column to every row.
#[derive(Debug)]
pub struct AddSequence {
    config: AddSequenceConfig,
}

impl AddSequence {
    pub const fn new(config: AddSequenceConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug)]
enum Counter {
    Local(i64),
    Shared {
        key: ResourceKey,
        value: Arc<AtomicI64>,
    },
}

#[derive(Debug)]
pub struct AddSequenceData {
    counter: Counter,
    shapes: Option<(Arc<RowShape>, Arc<RowShape>)>,
}

impl AddSequenceData {
    fn next_value(&mut self, increment: i64) -> i64 {
        match &mut self.counter {
            Counter::Local(next) => {
                let value = *next;
                *next = next.wrapping_add(increment);
                value
            }
            Counter::Shared { value, .. } => value.fetch_add(increment, Ordering::AcqRel),
        }
    }

    /// Output shape for rows read with `input`, computed once per input shape.
    fn output_shape(&mut self, input: &Arc<RowShape>, field_name: &str) -> Arc<RowShape> {
        if let Some((known, output)) = &self.shapes {
            if Arc::ptr_eq(known, input) {
                return Arc::clone(output);
            }
        }
        let mut output = RowShape::clone(input);
        output.push(ColumnMeta::new(field_name, ValueType::Integer));
        let output = Arc::new(output);
        self.shapes = Some((Arc::clone(input), Arc::clone(&output)));
        output
    }
}

impl Step for AddSequence {
    type Data = AddSequenceData;

    fn init(&self, _meta: &StepMeta, io: &mut StepIo) -> Result<AddSequenceData, StepError> {
        if self.config.increment == 0 {
            return Err(StepError::configuration("increment must not be zero"));
        }
        let counter = match &self.config.shared_counter {
            None => Counter::Local(self.config.start),
            Some(name) => {
                let key = ResourceKey::new(RESOURCE_GROUP, name, io.partition_id());
                let start = self.config.start;
                let value = io
                    .context()
                    .resources()
                    .acquire(&key, || AtomicI64::new(start))
                    .map_err(|error| StepError::configuration(error.to_string()))?;
                Counter::Shared { key, value }
            }
        };
        Ok(AddSequenceData {
            counter,
            shapes: None,
        })
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        data: &mut AddSequenceData,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        let Some(mut row) = io.get_row()? else {
            return Ok(BatchOutcome::Done);
        };
        let Some(input) = io.last_input_shape().cloned() else {
            return Err(StepError::failed("row read without a known shape"));
        };
        let shape = data.output_shape(&input, &self.config.field_name);
        row.push(data.next_value(self.config.increment));
        io.put_row_shaped(&shape, row)?;
        Ok(BatchOutcome::Continue)
    }

    fn dispose(&self, _meta: &StepMeta, data: AddSequenceData, io: &mut StepIo) {
        if let Counter::Shared { key, .. } = data.counter {
            io.context().resources().release(&key);
        }
    }
}
