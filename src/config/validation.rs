use std::collections::HashSet;

use rowflow_core::PartitionMethod;

use super::{consumers_of, topological_order, TransformationConfig};

/// Checks the shape of the step graph. Returns the warnings on success.
pub fn check(config: &TransformationConfig) -> Result<Vec<String>, Vec<String>> {
    let mut errors = vec![];
    let mut warnings = vec![];

    if config.steps.is_empty() {
        errors.push("No steps defined in the transformation.".to_owned());
    }
    if config.options.rowset_size == 0 {
        errors.push("Option `rowset_size` must be greater than zero.".to_owned());
    }
    if config.options.poll_interval_ms == 0 {
        errors.push("Option `poll_interval_ms` must be greater than zero.".to_owned());
    }

    let mut schema_names = HashSet::new();
    for schema in &config.partition_schemas {
        if !schema_names.insert(schema.name.as_str()) {
            errors.push(format!(
                "More than one partition schema with name {:?}.",
                schema.name
            ));
        }
        if schema.partitions.is_empty() {
            errors.push(format!("Partition schema {:?} has no partitions.", schema.name));
        }
    }

    for (name, step) in &config.steps {
        if name.contains('.') {
            errors.push(format!("Step name {name:?} should not contain a \".\"."));
        }
        if step.copies == 0 {
            errors.push(format!("Step {name:?} must run at least one copy."));
        }

        let mut seen = HashSet::new();
        for input in &step.inputs {
            if !config.steps.contains_key(input) {
                errors.push(format!("Input {input:?} for step {name:?} doesn't exist."));
            } else if input == name {
                errors.push(format!("Step {name:?} lists itself as an input."));
            }
            if !seen.insert(input) {
                errors.push(format!("Step {name:?} lists input {input:?} more than once."));
            }
        }

        if let Some(partitioning) = &step.partitioning {
            match config.partition_schema(&partitioning.schema) {
                None => errors.push(format!(
                    "Step {:?} refers to unknown partition schema {:?}.",
                    name, partitioning.schema
                )),
                Some(schema) => {
                    if step.copies != 1 && step.copies != schema.len() {
                        warnings.push(format!(
                            "Step {:?} is partitioned over {:?}; it runs {} copies, not {}.",
                            name,
                            schema.name,
                            schema.len(),
                            step.copies
                        ));
                    }
                }
            }
            if partitioning.method == PartitionMethod::Mod && partitioning.fields.is_empty() {
                errors.push(format!(
                    "Step {name:?} uses mod partitioning but names no partitioning fields."
                ));
            }
        }

        for (role, input) in &step.input_roles {
            if !step.inputs.contains(input) {
                errors.push(format!(
                    "Input role {role:?} of step {name:?} refers to {input:?}, which is not one of its inputs."
                ));
            }
        }

        let consumers = consumers_of(&config.steps, name);
        for (role, output) in &step.output_roles {
            if !consumers.contains(output) {
                errors.push(format!(
                    "Output role {role:?} of step {name:?} refers to {output:?}, which does not read from it."
                ));
            }
        }

        if config.steps.len() > 1 && step.inputs.is_empty() && consumers.is_empty() {
            warnings.push(format!("Step {name:?} is not connected to any other step."));
        }
    }

    if let Err(cycle) = topological_order(&config.steps) {
        errors.extend(cycle);
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(errors)
    }
}
