use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use super::BoxedStep;
use crate::config::StepMeta;

/// Builds the behavior of one step copy from its resolved description.
pub type StepFactory = Arc<dyn Fn(&StepMeta) -> crate::Result<BoxedStep> + Send + Sync>;

/// Step types known to a transformation, by their `type` name.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: IndexMap<String, StepFactory>,
}

impl StepRegistry {
    /// A registry holding every step type shipped with rowflow.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        crate::steps::register_builtins(&mut registry);
        registry
    }

    /// Registers a step type, replacing any previous one with the same name.
    pub fn register<F>(&mut self, step_type: &str, factory: F) -> &mut Self
    where
        F: Fn(&StepMeta) -> crate::Result<BoxedStep> + Send + Sync + 'static,
    {
        self.factories
            .insert(step_type.to_owned(), Arc::new(factory));
        self
    }

    pub fn build(&self, meta: &StepMeta) -> crate::Result<BoxedStep> {
        match self.factories.get(&meta.step_type) {
            Some(factory) => factory(meta),
            None => Err(format!(
                "Step {:?} has unknown type {:?}.",
                meta.name, meta.step_type
            )
            .into()),
        }
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    pub fn step_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
