//! Transformation configuration.
//!
//! A [`TransformationConfig`] is what users write (TOML or JSON). It is checked
//! by [`check`] and then resolved into one immutable [`StepMeta`] per step, in
//! topological order, before anything is wired or started.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use rowflow_core::{PartitionMethod, PartitionSchema, RowShape, DEFAULT_ROWSET_SIZE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

mod builder;
mod graph;
mod loading;
mod validation;

pub use builder::ConfigBuilder;
pub use graph::{consumers_of, topological_order};
pub use loading::{load_from_path, load_from_str, ConfigError, Format};
pub use validation::check;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_FEEDBACK_SIZE: u64 = 50_000;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransformationConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub options: RunOptions,

    #[serde(default)]
    pub partition_schemas: Vec<PartitionSchema>,

    #[serde(default)]
    pub steps: IndexMap<String, StepOuter>,
}

fn default_name() -> String {
    "transformation".to_owned()
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            options: RunOptions::default(),
            partition_schemas: Vec::new(),
            steps: IndexMap::new(),
        }
    }
}

/// Settings that apply to every step of one transformation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RunOptions {
    /// Capacity of every row set.
    pub rowset_size: usize,

    /// Upper bound on a single blocking wait, so that workers notice a stop
    /// request even when no row set signals them.
    pub poll_interval_ms: u64,

    /// A progress line is logged each time a step copy has read this many rows.
    /// Zero disables progress logging.
    pub feedback_size: u64,

    /// Check every written row against its row set shape.
    pub safe_mode: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            rowset_size: DEFAULT_ROWSET_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            feedback_size: DEFAULT_FEEDBACK_SIZE,
            safe_mode: false,
        }
    }
}

impl RunOptions {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Each row goes to exactly one output, chosen round-robin.
    #[default]
    Distribute,
    /// Each row is copied to every output.
    Copy,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepPartitioning {
    pub schema: String,

    #[serde(default)]
    pub method: PartitionMethod,

    #[serde(default)]
    pub fields: Vec<String>,
}

/// A step as written in the configuration file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepOuter {
    #[serde(rename = "type")]
    pub step_type: String,

    /// Upstream steps. Every entry is one hop into this step.
    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default = "default_copies")]
    pub copies: usize,

    #[serde(default)]
    pub distribution: Distribution,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<StepPartitioning>,

    /// Role name to upstream step name, for steps that treat inputs differently.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub input_roles: IndexMap<String, String>,

    /// Role name to downstream step name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub output_roles: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<RowShape>,

    /// Step type specific settings, handed to the step untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

const fn default_copies() -> usize {
    1
}

impl StepOuter {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            inputs: Vec::new(),
            copies: default_copies(),
            distribution: Distribution::default(),
            partitioning: None,
            input_roles: IndexMap::new(),
            output_roles: IndexMap::new(),
            output_shape: None,
            options: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    #[must_use]
    pub const fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    #[must_use]
    pub fn partitioned<I, S>(mut self, schema: &str, method: PartitionMethod, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitioning = Some(StepPartitioning {
            schema: schema.to_owned(),
            method,
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn with_input_role(mut self, role: &str, step: &str) -> Self {
        self.input_roles.insert(role.to_owned(), step.to_owned());
        self
    }

    #[must_use]
    pub fn with_output_role(mut self, role: &str, step: &str) -> Self {
        self.output_roles.insert(role.to_owned(), step.to_owned());
        self
    }

    #[must_use]
    pub fn with_output_shape(mut self, shape: RowShape) -> Self {
        self.output_shape = Some(shape);
        self
    }
}

/// Partitioning of a step with its schema looked up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPartitioning {
    pub schema: PartitionSchema,
    pub method: PartitionMethod,
    pub fields: Vec<String>,
}

/// Validated, immutable description of one step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepMeta {
    pub name: String,
    pub step_type: String,
    /// Effective number of copies. For a partitioned step this is the number of
    /// partitions in its schema and copy `j` owns partition `j`.
    pub copies: usize,
    pub distribution: Distribution,
    pub partitioning: Option<ResolvedPartitioning>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub input_roles: IndexMap<String, String>,
    pub output_roles: IndexMap<String, String>,
    pub output_shape: Option<Arc<RowShape>>,
    pub options: serde_json::Value,
}

impl StepMeta {
    /// Deserializes the step specific `options`. A missing table reads as empty.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.options {
            serde_json::Value::Null => serde_json::from_value(serde_json::json!({})),
            options => serde_json::from_value(options.clone()),
        }
    }

    pub fn input_role(&self, role: &str) -> Option<&str> {
        self.input_roles.get(role).map(String::as_str)
    }

    pub fn output_role(&self, role: &str) -> Option<&str> {
        self.output_roles.get(role).map(String::as_str)
    }

    pub fn partition_id(&self, copy: usize) -> Option<&str> {
        self.partitioning
            .as_ref()
            .and_then(|partitioning| partitioning.schema.partition_id(copy))
    }
}

impl TransformationConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn partition_schema(&self, name: &str) -> Option<&PartitionSchema> {
        self.partition_schemas
            .iter()
            .find(|schema| schema.name == name)
    }

    /// Checks the configuration and resolves every step, in topological order.
    pub fn resolve(&self) -> Result<Vec<Arc<StepMeta>>, Vec<String>> {
        let warnings = check(self)?;
        for warning in warnings {
            warn!(message = "Configuration warning.", transformation = %self.name, %warning);
        }

        let order = topological_order(&self.steps)?;
        let mut errors = Vec::new();
        let mut metas = Vec::with_capacity(order.len());
        for name in order {
            let outer = &self.steps[&name];
            let partitioning = match &outer.partitioning {
                None => None,
                Some(partitioning) => match self.partition_schema(&partitioning.schema) {
                    Some(schema) => Some(ResolvedPartitioning {
                        schema: schema.clone(),
                        method: partitioning.method,
                        fields: partitioning.fields.clone(),
                    }),
                    None => {
                        errors.push(format!(
                            "Step {:?} refers to unknown partition schema {:?}.",
                            name, partitioning.schema
                        ));
                        continue;
                    }
                },
            };
            let copies = partitioning
                .as_ref()
                .map_or(outer.copies, |partitioning| partitioning.schema.len());

            metas.push(Arc::new(StepMeta {
                outputs: consumers_of(&self.steps, &name),
                step_type: outer.step_type.clone(),
                copies,
                distribution: outer.distribution,
                partitioning,
                inputs: outer.inputs.clone(),
                input_roles: outer.input_roles.clone(),
                output_roles: outer.output_roles.clone(),
                output_shape: outer.output_shape.clone().map(Arc::new),
                options: outer.options.clone(),
                name,
            }));
        }

        if errors.is_empty() {
            Ok(metas)
        } else {
            Err(errors)
        }
    }
}
