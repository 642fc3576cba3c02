use indexmap::IndexMap;
use rowflow_core::PartitionSchema;

use super::{check, RunOptions, StepOuter, TransformationConfig};

/// Programmatic construction of a [`TransformationConfig`].
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    pub name: Option<String>,
    pub options: RunOptions,
    pub partition_schemas: Vec<PartitionSchema>,
    pub steps: IndexMap<String, StepOuter>,
}

impl ConfigBuilder {
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_options(&mut self, options: RunOptions) {
        self.options = options;
    }

    pub fn add_partition_schema(&mut self, schema: PartitionSchema) {
        self.partition_schemas.push(schema);
    }

    /// Adds a step reading from `inputs`. Replaces any step with the same name.
    pub fn add_step(&mut self, name: impl Into<String>, inputs: &[&str], step: StepOuter) {
        let mut step = step;
        step.inputs = inputs.iter().map(|input| (*input).to_owned()).collect();
        self.steps.insert(name.into(), step);
    }

    /// Builds the configuration, logging warnings and failing on errors.
    pub fn build(self) -> Result<TransformationConfig, Vec<String>> {
        let (config, warnings) = self.build_with_warnings()?;
        for warning in warnings {
            warn!(message = "Configuration warning.", transformation = %config.name, %warning);
        }
        Ok(config)
    }

    pub fn build_with_warnings(self) -> Result<(TransformationConfig, Vec<String>), Vec<String>> {
        let config = TransformationConfig {
            name: self.name.unwrap_or_else(|| TransformationConfig::default().name),
            options: self.options,
            partition_schemas: self.partition_schemas,
            steps: self.steps,
        };
        let warnings = check(&config)?;
        Ok((config, warnings))
    }
}

impl From<TransformationConfig> for ConfigBuilder {
    fn from(config: TransformationConfig) -> Self {
        Self {
            name: Some(config.name),
            options: config.options,
            partition_schemas: config.partition_schemas,
            steps: config.steps,
        }
    }
}
