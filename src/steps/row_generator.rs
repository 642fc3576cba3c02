use std::sync::Arc;

use rowflow_core::{Row, RowShape, Value, ValueType};
use serde::{Deserialize, Serialize};

use crate::{
    config::StepMeta,
    step::{BatchOutcome, Step, StepError, StepIo},
};

const fn default_limit() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RowGeneratorConfig {
    /// Rows emitted by every copy.
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Ignore `limit` and emit until the transformation is stopped.
    #[serde(default)]
    pub never_ending: bool,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Textual value, parsed according to `type`. Missing or empty is null.
    #[serde(default)]
    pub value: Option<String>,
}

/// Emits the same configured row over and over.
#[derive(Debug)]
pub struct RowGenerator {
    config: RowGeneratorConfig,
}

impl RowGenerator {
    pub const fn new(config: RowGeneratorConfig) -> Self {
        Self { config }
    }

    fn build_row(&self) -> Result<(RowShape, Row), StepError> {
        let mut shape = RowShape::default();
        let mut row = Row::with_capacity(self.config.fields.len());
        for field in &self.config.fields {
            let value = match &field.value {
                Some(input) => Value::parse(field.value_type, input).map_err(|error| {
                    StepError::configuration(format!("field {:?}: {}", field.name, error))
                })?,
                None => Value::Null,
            };
            shape = shape.with_column(field.name.clone(), field.value_type);
            row.push(value);
        }
        Ok((shape, row))
    }
}

#[derive(Debug)]
pub struct RowGeneratorData {
    row: Row,
    emitted: u64,
}

impl Step for RowGenerator {
    type Data = RowGeneratorData;

    fn init(&self, meta: &StepMeta, io: &mut StepIo) -> Result<RowGeneratorData, StepError> {
        let (shape, row) = self.build_row()?;
        if let Some(declared) = &meta.output_shape {
            declared
                .check_compatible(&shape)
                .map_err(|error| StepError::Layout { source: error })?;
        }
        io.set_output_shape(Arc::new(shape));
        Ok(RowGeneratorData { row, emitted: 0 })
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        data: &mut RowGeneratorData,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        if !self.config.never_ending && data.emitted >= self.config.limit {
            return Ok(BatchOutcome::Done);
        }
        io.put_row(data.row.clone())?;
        data.emitted += 1;
        if !self.config.never_ending && data.emitted >= self.config.limit {
            return Ok(BatchOutcome::Done);
        }
        Ok(BatchOutcome::Continue)
    }
}
