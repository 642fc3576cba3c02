use serde::{Deserialize, Serialize};

use crate::{
    config::StepMeta,
    step::{BatchOutcome, Step, StepError, StepIo},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

const fn default_header() -> bool {
    true
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WriteToLogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Stop logging after this many rows; zero logs every row. Rows keep flowing.
    #[serde(default)]
    pub limit: u64,
    /// Log the column names with every value.
    #[serde(default = "default_header")]
    pub header: bool,
}

/// Logs every row through `tracing` and passes it on.
#[derive(Debug)]
pub struct WriteToLog {
    config: WriteToLogConfig,
}

impl WriteToLog {
    pub const fn new(config: WriteToLogConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Default)]
pub struct WriteToLogData {
    logged: u64,
}

impl Step for WriteToLog {
    type Data = WriteToLogData;

    fn init(&self, _meta: &StepMeta, _io: &mut StepIo) -> Result<WriteToLogData, StepError> {
        Ok(WriteToLogData::default())
    }

    fn process_one_batch(
        &self,
        meta: &StepMeta,
        data: &mut WriteToLogData,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        let Some(row) = io.get_row()? else {
            return Ok(BatchOutcome::Done);
        };

        if self.config.limit == 0 || data.logged < self.config.limit {
            data.logged += 1;
            let line = match (self.config.header, io.last_input_shape()) {
                (true, Some(shape)) => shape
                    .field_names()
                    .zip(row.values())
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => row.to_string(),
            };
            let step = meta.name.as_str();
            let copy = io.copy();
            match self.config.level {
                LogLevel::Error => error!(message = %line, step, copy),
                LogLevel::Warn => warn!(message = %line, step, copy),
                LogLevel::Info => info!(message = %line, step, copy),
                LogLevel::Debug => debug!(message = %line, step, copy),
                LogLevel::Trace => trace!(message = %line, step, copy),
            }
        }

        io.put_row(row)?;
        Ok(BatchOutcome::Continue)
    }
}
