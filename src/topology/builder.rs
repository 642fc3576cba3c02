use std::{collections::HashMap, sync::Arc};

use rowflow_core::{ModPartitioner, PartitionMethod, Partitioner, RowSet, RowSetId};

use super::ExecutionMode;
use crate::{
    config::{StepMeta, TransformationConfig},
    context::TransContext,
    step::{IoMode, StepCopy, StepIo},
};

/// Step copies and row sets of a transformation, wired but not initialized.
#[derive(Debug)]
pub struct Pieces {
    pub context: TransContext,
    pub mode: ExecutionMode,
    pub metas: Vec<Arc<StepMeta>>,
    /// Every copy, steps in topological order and copies in copy order.
    pub copies: Vec<StepCopy>,
    pub rowsets: Vec<Arc<RowSet>>,
}

impl Pieces {
    pub fn meta(&self, step: &str) -> Option<&Arc<StepMeta>> {
        self.metas.iter().find(|meta| meta.name == step)
    }

    /// Binds an extra input row set to one copy, such as a relay fed from outside
    /// the transformation. Returns `false` if there is no such copy.
    pub fn attach_input(&mut self, step: &str, copy: usize, rowset: Arc<RowSet>) -> bool {
        let Some(target) = self.copy_mut(step, copy) else {
            return false;
        };
        target.io_mut().add_input(Arc::clone(&rowset));
        self.register(rowset);
        true
    }

    /// Binds an extra output row set to one copy. Rows reach it like they reach
    /// any other consumer, under the `target` name.
    pub fn attach_output(
        &mut self,
        step: &str,
        copy: usize,
        target: &str,
        rowset: Arc<RowSet>,
    ) -> bool {
        let Some(source) = self.copy_mut(step, copy) else {
            return false;
        };
        source.io_mut().add_output(target, Arc::clone(&rowset));
        self.register(rowset);
        true
    }

    fn copy_mut(&mut self, step: &str, copy: usize) -> Option<&mut StepCopy> {
        self.copies
            .iter_mut()
            .find(|candidate| candidate.step() == step && candidate.copy() == copy)
    }

    fn register(&mut self, rowset: Arc<RowSet>) {
        self.context
            .control()
            .register_rowsets(std::iter::once(Arc::clone(&rowset)));
        self.rowsets.push(rowset);
    }
}

/// Creates a row set between two copies, sized for the execution mode.
pub fn new_rowset(
    mode: ExecutionMode,
    capacity: usize,
    from: (&str, usize),
    to: (&str, usize),
) -> Arc<RowSet> {
    let id = RowSetId::new(from.0, from.1, to.0, to.1);
    Arc::new(match mode {
        ExecutionMode::Threaded => RowSet::bounded(id, capacity),
        ExecutionMode::SingleThreaded => RowSet::unbounded(id),
    })
}

/// Builds every step copy and wires one row set per producer copy and consumer
/// copy pair of every hop.
pub fn build_pieces(
    config: &TransformationConfig,
    context: TransContext,
    mode: ExecutionMode,
) -> Result<Pieces, Vec<String>> {
    let metas = config.resolve()?;
    let io_mode = match mode {
        ExecutionMode::Threaded => IoMode::Blocking,
        ExecutionMode::SingleThreaded => IoMode::NonBlocking,
    };

    let mut errors = vec![];

    // Build step copies
    let mut copies: Vec<Vec<StepCopy>> = Vec::with_capacity(metas.len());
    for meta in &metas {
        let mut step_copies = Vec::with_capacity(meta.copies);
        for copy in 0..meta.copies {
            let behavior = match context.registry().build(meta) {
                Err(error) => {
                    errors.push(format!("Step {:?}: {}", meta.name, error));
                    break;
                }
                Ok(behavior) => behavior,
            };
            if copy == 0 {
                for role in behavior.input_roles() {
                    if meta.input_role(role).is_none() {
                        errors.push(format!(
                            "Step {:?} requires input role {:?}.",
                            meta.name, role
                        ));
                    }
                }
                for role in behavior.output_roles() {
                    if meta.output_role(role).is_none() {
                        errors.push(format!(
                            "Step {:?} requires output role {:?}.",
                            meta.name, role
                        ));
                    }
                }
            }

            let mut io = StepIo::new(
                &meta.name,
                copy,
                meta.partition_id(copy),
                io_mode,
                meta.distribution,
                context.clone(),
            );
            if let Some(shape) = &meta.output_shape {
                io.set_output_shape(Arc::clone(shape));
            }
            step_copies.push(StepCopy::new(Arc::clone(meta), copy, behavior, io));
        }
        copies.push(step_copies);
    }

    // Resolve partitioners of partitioned consumers
    let mut partitioners: HashMap<&str, Option<Arc<dyn Partitioner>>> = HashMap::new();
    for meta in &metas {
        let Some(partitioning) = &meta.partitioning else {
            continue;
        };
        let partitioner: Option<Arc<dyn Partitioner>> = match partitioning.method {
            PartitionMethod::Mirror => None,
            PartitionMethod::Mod => {
                match ModPartitioner::for_schema(partitioning.fields.clone(), &partitioning.schema)
                {
                    Ok(partitioner) => Some(Arc::new(partitioner)),
                    Err(error) => {
                        errors.push(format!("Step {:?}: {}", meta.name, error));
                        continue;
                    }
                }
            }
        };
        partitioners.insert(meta.name.as_str(), partitioner);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // Wire hops
    let index_of = metas
        .iter()
        .enumerate()
        .map(|(index, meta)| (meta.name.as_str(), index))
        .collect::<HashMap<_, _>>();
    let capacity = context.options().rowset_size;
    let mut rowsets = vec![];
    for (producer, meta) in metas.iter().enumerate() {
        for output in &meta.outputs {
            let Some(&consumer) = index_of.get(output.as_str()) else {
                continue;
            };
            let consumer_meta = &metas[consumer];
            for origin_copy in 0..meta.copies {
                let created = (0..consumer_meta.copies)
                    .map(|destination_copy| {
                        let rowset = new_rowset(
                            mode,
                            capacity,
                            (&meta.name, origin_copy),
                            (&consumer_meta.name, destination_copy),
                        );
                        if let Some(shape) = &meta.output_shape {
                            rowset.declare_shape(Arc::clone(shape));
                        }
                        rowset
                    })
                    .collect::<Vec<_>>();

                for (destination_copy, rowset) in created.iter().enumerate() {
                    copies[consumer][destination_copy]
                        .io_mut()
                        .add_input(Arc::clone(rowset));
                }
                let io = copies[producer][origin_copy].io_mut();
                match partitioners.get(consumer_meta.name.as_str()) {
                    Some(partitioner) => {
                        io.add_partitioned_output(
                            &consumer_meta.name,
                            created.clone(),
                            partitioner.clone(),
                        );
                    }
                    None => {
                        for rowset in &created {
                            io.add_output(&consumer_meta.name, Arc::clone(rowset));
                        }
                    }
                }
                rowsets.extend(created);
            }
        }
    }

    context.control().register_rowsets(rowsets.iter().cloned());
    debug!(
        message = "Transformation wired.",
        transformation = %context.name(),
        copies = copies.iter().map(Vec::len).sum::<usize>(),
        rowsets = rowsets.len(),
    );

    Ok(Pieces {
        context,
        mode,
        metas,
        copies: copies.into_iter().flatten().collect(),
        rowsets,
    })
}
