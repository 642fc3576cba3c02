//! Per-transformation state shared by every step copy of one run.

use std::sync::Arc;

mod control;
mod resources;
mod sub_transformations;

pub use control::{FailedStep, RunControl};
pub use resources::{ResourceError, ResourceKey, SharedResources};
pub use sub_transformations::ActiveSubTransformations;

use crate::{
    config::{RunOptions, TransformationConfig},
    step::StepRegistry,
};

/// Everything a step may reach beyond its own row sets.
///
/// Cloning is cheap; all clones observe the same run.
#[derive(Clone, Debug)]
pub struct TransContext {
    name: Arc<str>,
    options: Arc<RunOptions>,
    control: RunControl,
    resources: SharedResources,
    sub_transformations: ActiveSubTransformations,
    registry: Arc<StepRegistry>,
}

impl TransContext {
    pub fn new(name: impl Into<String>, options: RunOptions, registry: Arc<StepRegistry>) -> Self {
        Self {
            name: Arc::from(name.into()),
            options: Arc::new(options),
            control: RunControl::new(),
            resources: SharedResources::default(),
            sub_transformations: ActiveSubTransformations::default(),
            registry,
        }
    }

    pub fn for_config(config: &TransformationConfig, registry: Arc<StepRegistry>) -> Self {
        Self::new(config.name.clone(), config.options.clone(), registry)
    }

    /// Context for a transformation embedded in a step of this one. The nested
    /// run has its own control flags but shares resources and step types.
    pub fn nested(&self, config: &TransformationConfig) -> Self {
        Self {
            name: Arc::from(config.name.as_str()),
            options: Arc::new(config.options.clone()),
            control: RunControl::new(),
            resources: self.resources.clone(),
            sub_transformations: ActiveSubTransformations::default(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub const fn control(&self) -> &RunControl {
        &self.control
    }

    pub const fn resources(&self) -> &SharedResources {
        &self.resources
    }

    pub const fn sub_transformations(&self) -> &ActiveSubTransformations {
        &self.sub_transformations
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Stops this run and every nested run registered under it.
    pub fn stop(&self) {
        self.control.stop();
        self.sub_transformations.stop_all();
    }
}
