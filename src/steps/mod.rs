//! Step types shipped with rowflow.

pub mod add_sequence;
pub mod append;
pub mod dummy;
pub mod mapping;
pub mod row_generator;
pub mod write_to_log;

use crate::step::{boxed, StepRegistry};

/// Registers every built-in step type under its configuration `type` name.
pub fn register_builtins(registry: &mut StepRegistry) {
    registry
        .register("row_generator", |meta| {
            Ok(boxed(row_generator::RowGenerator::new(meta.options()?)))
        })
        .register("dummy", |_| Ok(boxed(dummy::Dummy)))
        .register(mapping::MAPPING_INPUT, |_| Ok(boxed(dummy::Dummy)))
        .register(mapping::MAPPING_OUTPUT, |_| Ok(boxed(dummy::Dummy)))
        .register("append", |_| Ok(boxed(append::Append)))
        .register("write_to_log", |meta| {
            Ok(boxed(write_to_log::WriteToLog::new(meta.options()?)))
        })
        .register("add_sequence", |meta| {
            Ok(boxed(add_sequence::AddSequence::new(meta.options()?)))
        })
        .register("mapping", |meta| {
            Ok(boxed(mapping::Mapping::new(meta.options()?)))
        });
}
