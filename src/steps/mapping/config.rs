use serde::{Deserialize, Serialize};

use crate::{
    config::{StepMeta, TransformationConfig},
    step::StepError,
    topology::ExecutionMode,
};

pub const MAPPING_INPUT: &str = "mapping_input";
pub const MAPPING_OUTPUT: &str = "mapping_output";

/// Settings of a `mapping` step.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// The sub-transformation run by every copy of the step.
    pub transformation: TransformationConfig,

    #[serde(default)]
    pub execution: ExecutionMode,

    #[serde(default)]
    pub input_mappings: Vec<InputMapping>,

    #[serde(default)]
    pub output_mappings: Vec<OutputMapping>,
}

/// Feeds rows read by the mapping step into a step of the sub-transformation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputMapping {
    /// Outer step whose rows are relayed. Missing means every input row.
    #[serde(default)]
    pub outer_step: Option<String>,
    /// Receiving step. Missing means the only `mapping_input` step.
    #[serde(default)]
    pub nested_step: Option<String>,
}

/// Relays the rows written by a step of the sub-transformation to the outputs
/// of the mapping step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputMapping {
    /// Producing step. Missing means the only `mapping_output` step.
    #[serde(default)]
    pub nested_step: Option<String>,
    /// Outer step receiving the rows. Missing means every output.
    #[serde(default)]
    pub outer_step: Option<String>,
}

/// A mapping whose steps are known to exist on both sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub outer: Option<String>,
    pub nested: String,
}

impl MappingConfig {
    fn only_step_of_type(&self, step_type: &str) -> Result<String, StepError> {
        let mut matching = self
            .transformation
            .steps
            .iter()
            .filter(|(_, step)| step.step_type == step_type)
            .map(|(name, _)| name);
        match (matching.next(), matching.next()) {
            (Some(name), None) => Ok(name.clone()),
            (None, _) => Err(StepError::configuration(format!(
                "the sub-transformation has no {step_type:?} step"
            ))),
            (Some(_), Some(_)) => Err(StepError::configuration(format!(
                "the sub-transformation has several {step_type:?} steps; name one explicitly"
            ))),
        }
    }

    fn nested_step(&self, named: Option<&String>, step_type: &str) -> Result<String, StepError> {
        match named {
            Some(name) if self.transformation.steps.contains_key(name) => Ok(name.clone()),
            Some(name) => Err(StepError::configuration(format!(
                "mapping target {name:?} is not a step of the sub-transformation"
            ))),
            None => self.only_step_of_type(step_type),
        }
    }

    /// Resolves the input mappings against the outer step and the sub-transformation.
    pub fn input_routes(&self, meta: &StepMeta) -> Result<Vec<Route>, StepError> {
        let defaults = [InputMapping::default()];
        let mappings = match self.input_mappings.as_slice() {
            [] if meta.inputs.is_empty() => return Ok(Vec::new()),
            [] => &defaults[..],
            mappings => mappings,
        };
        if mappings.len() > 1 && mappings.iter().any(|mapping| mapping.outer_step.is_none()) {
            return Err(StepError::configuration(
                "every input mapping must name its outer step when there are several",
            ));
        }

        mappings
            .iter()
            .map(|mapping| {
                if let Some(outer) = &mapping.outer_step {
                    if !meta.inputs.contains(outer) {
                        return Err(StepError::configuration(format!(
                            "input mapping reads from {outer:?}, which is not an input of {:?}",
                            meta.name
                        )));
                    }
                }
                Ok(Route {
                    outer: mapping.outer_step.clone(),
                    nested: self.nested_step(mapping.nested_step.as_ref(), MAPPING_INPUT)?,
                })
            })
            .collect()
    }

    /// Resolves the output mappings against the outer step and the sub-transformation.
    pub fn output_routes(&self, meta: &StepMeta) -> Result<Vec<Route>, StepError> {
        let defaults = [OutputMapping::default()];
        let mappings = match self.output_mappings.as_slice() {
            [] if meta.outputs.is_empty() => return Ok(Vec::new()),
            [] => &defaults[..],
            mappings => mappings,
        };

        mappings
            .iter()
            .map(|mapping| {
                if let Some(outer) = &mapping.outer_step {
                    if !meta.outputs.contains(outer) {
                        return Err(StepError::configuration(format!(
                            "output {outer:?} is declared but no step consumes it from {:?}",
                            meta.name
                        )));
                    }
                }
                Ok(Route {
                    outer: mapping.outer_step.clone(),
                    nested: self.nested_step(mapping.nested_step.as_ref(), MAPPING_OUTPUT)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::StepOuter;

    fn nested() -> TransformationConfig {
        let mut builder = TransformationConfig::builder();
        builder.set_name("nested");
        builder.add_step("in", &[], StepOuter::new(MAPPING_INPUT));
        builder.add_step("work", &["in"], StepOuter::new("dummy"));
        builder.add_step("out", &["work"], StepOuter::new(MAPPING_OUTPUT));
        builder.build().unwrap()
    }

    fn outer_meta(inputs: &[&str], outputs: &[&str]) -> Arc<StepMeta> {
        let mut builder = TransformationConfig::builder();
        for input in inputs {
            builder.add_step(*input, &[], StepOuter::new("row_generator"));
        }
        builder.add_step("map", inputs, StepOuter::new("mapping"));
        for output in outputs {
            builder.add_step(*output, &["map"], StepOuter::new("dummy"));
        }
        let config = builder.build().unwrap();
        config
            .resolve()
            .unwrap()
            .into_iter()
            .find(|meta| meta.name == "map")
            .unwrap()
    }

    #[test]
    fn defaults_use_boundary_steps() {
        let config = MappingConfig {
            transformation: nested(),
            ..MappingConfig::default()
        };
        let meta = outer_meta(&["gen"], &["sink"]);
        assert_eq!(
            config.input_routes(&meta).unwrap(),
            vec![Route {
                outer: None,
                nested: "in".to_owned()
            }]
        );
        assert_eq!(
            config.output_routes(&meta).unwrap(),
            vec![Route {
                outer: None,
                nested: "out".to_owned()
            }]
        );
    }

    #[test]
    fn unconnected_sides_need_no_mapping() {
        let config = MappingConfig {
            transformation: nested(),
            ..MappingConfig::default()
        };
        let meta = outer_meta(&[], &[]);
        assert!(config.input_routes(&meta).unwrap().is_empty());
        assert!(config.output_routes(&meta).unwrap().is_empty());
    }

    #[test]
    fn missing_nested_target_is_rejected() {
        let config = MappingConfig {
            transformation: nested(),
            input_mappings: vec![InputMapping {
                outer_step: None,
                nested_step: Some("absent".to_owned()),
            }],
            ..MappingConfig::default()
        };
        let error = config.input_routes(&outer_meta(&["gen"], &[])).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid configuration: mapping target \"absent\" is not a step of the sub-transformation"
        );
    }

    #[test]
    fn unconsumed_output_is_rejected() {
        let config = MappingConfig {
            transformation: nested(),
            output_mappings: vec![OutputMapping {
                nested_step: None,
                outer_step: Some("nobody".to_owned()),
            }],
            ..MappingConfig::default()
        };
        let error = config
            .output_routes(&outer_meta(&["gen"], &["sink"]))
            .unwrap_err();
        assert!(error.to_string().contains("declared but no step consumes it"));
    }

    #[test]
    fn several_inputs_must_name_outer_steps() {
        let config = MappingConfig {
            transformation: nested(),
            input_mappings: vec![
                InputMapping {
                    outer_step: Some("a".to_owned()),
                    nested_step: None,
                },
                InputMapping::default(),
            ],
            ..MappingConfig::default()
        };
        assert!(config.input_routes(&outer_meta(&["a", "b"], &[])).is_err());
    }
}
