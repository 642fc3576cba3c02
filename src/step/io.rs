use std::{sync::Arc, time::Duration};

use rowflow_core::{GetError, Partitioner, PutError, Row, RowSet, RowShape};
use snafu::ResultExt;

use super::{LayoutSnafu, PartitionSnafu, StepCounters, StepError};
use crate::{
    config::Distribution,
    context::{RunControl, TransContext},
    internal_events::{RowsetsStopped, StepProgress},
};

/// How reads behave when an input is empty but still open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoMode {
    /// Wait for rows in slices of the poll interval. Used by the thread scheduler.
    Blocking,
    /// Return [`StepError::Pending`] instead of waiting. Used by cooperative
    /// execution, where the producer only runs after this step yields.
    NonBlocking,
}

/// Result of a read that never waits.
#[derive(Debug, PartialEq)]
pub enum RowPoll {
    Row(Row),
    /// Some input is still open but none had a row.
    Pending,
    /// Every selected input is done and drained.
    Done,
}

#[derive(Debug)]
struct Input {
    rowset: Arc<RowSet>,
    finished: bool,
}

#[derive(Debug)]
enum Target {
    Single(Arc<RowSet>),
    /// One row set per destination copy, in copy order. Without a partitioner
    /// every row is mirrored to all of them.
    Partitioned {
        rowsets: Vec<Arc<RowSet>>,
        partitioner: Option<Arc<dyn Partitioner>>,
    },
}

impl Target {
    fn resolve(
        &self,
        row: &Row,
        shape: &RowShape,
        selected: &mut Vec<Arc<RowSet>>,
    ) -> Result<(), StepError> {
        match self {
            Self::Single(rowset) => selected.push(Arc::clone(rowset)),
            Self::Partitioned {
                rowsets,
                partitioner: None,
            } => selected.extend(rowsets.iter().cloned()),
            Self::Partitioned {
                rowsets,
                partitioner: Some(partitioner),
            } => {
                let index = partitioner.partition(row, shape).context(PartitionSnafu)?;
                if let Some(rowset) = rowsets.get(index) {
                    selected.push(Arc::clone(rowset));
                }
            }
        }
        Ok(())
    }

    fn rowsets(&self) -> &[Arc<RowSet>] {
        match self {
            Self::Single(rowset) => std::slice::from_ref(rowset),
            Self::Partitioned { rowsets, .. } => rowsets,
        }
    }
}

/// Output targets of one destination step.
#[derive(Debug)]
struct OutputGroup {
    step: String,
    targets: Vec<Target>,
    cursor: usize,
}

/// Chooses the output row sets of every written row.
///
/// A partitioned destination step counts as one target and its partitioner
/// picks the copy; any other destination row set is a target of its own.
/// `Copy` writes to every target, `Distribute` rotates over them.
#[derive(Debug)]
struct OutputRouter {
    distribution: Distribution,
    groups: Vec<OutputGroup>,
    cursor: usize,
}

impl OutputRouter {
    fn group_mut(&mut self, step: &str) -> &mut OutputGroup {
        let index = match self.groups.iter().position(|group| group.step == step) {
            Some(index) => index,
            None => {
                self.groups.push(OutputGroup {
                    step: step.to_owned(),
                    targets: Vec::new(),
                    cursor: 0,
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }

    fn select(
        &mut self,
        target: Option<&str>,
        row: &Row,
        shape: &RowShape,
    ) -> Result<Vec<Arc<RowSet>>, StepError> {
        let mut selected = Vec::new();
        match (self.distribution, target) {
            (Distribution::Copy, _) => {
                for group in &self.groups {
                    if target.is_some_and(|target| target != group.step) {
                        continue;
                    }
                    for destination in &group.targets {
                        destination.resolve(row, shape, &mut selected)?;
                    }
                }
            }
            (Distribution::Distribute, Some(target)) => {
                if let Some(group) = self.groups.iter_mut().find(|group| group.step == target) {
                    if !group.targets.is_empty() {
                        let index = group.cursor % group.targets.len();
                        group.cursor = group.cursor.wrapping_add(1);
                        group.targets[index].resolve(row, shape, &mut selected)?;
                    }
                }
            }
            (Distribution::Distribute, None) => {
                let total = self.groups.iter().map(|group| group.targets.len()).sum::<usize>();
                if total > 0 {
                    let mut index = self.cursor % total;
                    self.cursor = self.cursor.wrapping_add(1);
                    for group in &self.groups {
                        if index < group.targets.len() {
                            group.targets[index].resolve(row, shape, &mut selected)?;
                            break;
                        }
                        index -= group.targets.len();
                    }
                }
            }
        }
        Ok(selected)
    }

    fn rowsets(&self) -> impl Iterator<Item = &Arc<RowSet>> {
        self.groups
            .iter()
            .flat_map(|group| group.targets.iter().flat_map(Target::rowsets))
    }
}

/// The row set bindings of one step copy, and the only way a step reads and
/// writes rows.
#[derive(Debug)]
pub struct StepIo {
    step: String,
    copy: usize,
    partition_id: Option<String>,
    mode: IoMode,
    context: TransContext,
    counters: Arc<StepCounters>,
    inputs: Vec<Input>,
    cursor: usize,
    outputs: OutputRouter,
    output_shape: Option<Arc<RowShape>>,
    last_input_shape: Option<Arc<RowShape>>,
    // Safe mode only: every later input shape must be compatible with this one.
    reference_shape: Option<Arc<RowShape>>,
}

impl StepIo {
    pub(crate) fn new(
        step: &str,
        copy: usize,
        partition_id: Option<&str>,
        mode: IoMode,
        distribution: Distribution,
        context: TransContext,
    ) -> Self {
        Self {
            step: step.to_owned(),
            copy,
            partition_id: partition_id.map(ToOwned::to_owned),
            mode,
            context,
            counters: Arc::default(),
            inputs: Vec::new(),
            cursor: 0,
            outputs: OutputRouter {
                distribution,
                groups: Vec::new(),
                cursor: 0,
            },
            output_shape: None,
            last_input_shape: None,
            reference_shape: None,
        }
    }

    pub(crate) fn add_input(&mut self, rowset: Arc<RowSet>) {
        self.inputs.push(Input {
            rowset,
            finished: false,
        });
    }

    pub(crate) fn add_output(&mut self, step: &str, rowset: Arc<RowSet>) {
        self.outputs.group_mut(step).targets.push(Target::Single(rowset));
    }

    pub(crate) fn add_partitioned_output(
        &mut self,
        step: &str,
        rowsets: Vec<Arc<RowSet>>,
        partitioner: Option<Arc<dyn Partitioner>>,
    ) {
        self.outputs.group_mut(step).targets.push(Target::Partitioned {
            rowsets,
            partitioner,
        });
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub const fn copy(&self) -> usize {
        self.copy
    }

    /// Partition identifier owned by this copy of a partitioned step.
    pub fn partition_id(&self) -> Option<&str> {
        self.partition_id.as_deref()
    }

    pub const fn mode(&self) -> IoMode {
        self.mode
    }

    pub const fn context(&self) -> &TransContext {
        &self.context
    }

    pub const fn control(&self) -> &RunControl {
        self.context.control()
    }

    pub fn poll_interval(&self) -> Duration {
        self.context.options().poll_interval()
    }

    pub const fn counters(&self) -> &Arc<StepCounters> {
        &self.counters
    }

    /// Distinct upstream step names, in wiring order.
    pub fn input_steps(&self) -> Vec<&str> {
        let mut steps = Vec::new();
        for input in &self.inputs {
            let step = input.rowset.id().origin_step.as_str();
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
        steps
    }

    /// Downstream step names, in wiring order.
    pub fn output_steps(&self) -> Vec<&str> {
        self.outputs
            .groups
            .iter()
            .map(|group| group.step.as_str())
            .collect()
    }

    pub fn has_input_from(&self, step: &str) -> bool {
        self.inputs
            .iter()
            .any(|input| input.rowset.id().origin_step == step)
    }

    pub fn input_rowsets(&self) -> impl Iterator<Item = &Arc<RowSet>> {
        self.inputs.iter().map(|input| &input.rowset)
    }

    pub fn output_rowsets(&self) -> impl Iterator<Item = &Arc<RowSet>> {
        self.outputs.rowsets()
    }

    /// Shape of the most recently read row.
    pub const fn last_input_shape(&self) -> Option<&Arc<RowShape>> {
        self.last_input_shape.as_ref()
    }

    pub const fn output_shape(&self) -> Option<&Arc<RowShape>> {
        self.output_shape.as_ref()
    }

    /// Shape of the rows written by [`put_row`](Self::put_row). Without one, rows
    /// are written with the shape of the last row read.
    pub fn set_output_shape(&mut self, shape: Arc<RowShape>) {
        self.output_shape = Some(shape);
    }

    /// Reads the next row from any input, rotating over the inputs.
    ///
    /// Returns `Ok(None)` once every input is done and drained. In
    /// [`IoMode::NonBlocking`] an empty open input yields [`StepError::Pending`].
    pub fn get_row(&mut self) -> Result<Option<Row>, StepError> {
        self.read(None)
    }

    /// Like [`get_row`](Self::get_row), restricted to the row sets coming from `step`.
    pub fn get_row_from(&mut self, step: &str) -> Result<Option<Row>, StepError> {
        self.read(Some(step))
    }

    /// Reads a row if one is available right now, regardless of the mode.
    pub fn poll_row(&mut self) -> Result<RowPoll, StepError> {
        self.poll(None)
    }

    pub fn poll_row_from(&mut self, step: &str) -> Result<RowPoll, StepError> {
        self.poll(Some(step))
    }

    fn read(&mut self, from: Option<&str>) -> Result<Option<Row>, StepError> {
        loop {
            match self.poll(from)? {
                RowPoll::Row(row) => return Ok(Some(row)),
                RowPoll::Done => return Ok(None),
                RowPoll::Pending => {}
            }
            if self.mode == IoMode::NonBlocking {
                return Err(StepError::Pending);
            }
            if self.control().is_stopped() {
                return Err(StepError::Cancelled);
            }

            let Some(index) = self.next_open_input(from) else {
                continue;
            };
            let rowset = Arc::clone(&self.inputs[index].rowset);
            match rowset.get(self.poll_interval()) {
                Ok(Some(row)) => {
                    self.cursor = index + 1;
                    return self.accept(index, row).map(Some);
                }
                Ok(None) => self.inputs[index].finished = true,
                Err(GetError::Empty) => {}
                Err(GetError::Stopped) => return Err(StepError::Cancelled),
            }
        }
    }

    fn poll(&mut self, from: Option<&str>) -> Result<RowPoll, StepError> {
        let count = self.inputs.len();
        let mut open = false;
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let input = &self.inputs[index];
            if input.finished || !selects(from, &input.rowset) {
                continue;
            }
            match input.rowset.try_get() {
                Ok(Some(row)) => {
                    self.cursor = index + 1;
                    return self.accept(index, row).map(RowPoll::Row);
                }
                Ok(None) => self.inputs[index].finished = true,
                Err(GetError::Empty) => open = true,
                Err(GetError::Stopped) => return Err(StepError::Cancelled),
            }
        }
        Ok(if open { RowPoll::Pending } else { RowPoll::Done })
    }

    fn next_open_input(&self, from: Option<&str>) -> Option<usize> {
        let count = self.inputs.len();
        (0..count)
            .map(|offset| (self.cursor + offset) % count)
            .find(|index| {
                let input = &self.inputs[*index];
                !input.finished && selects(from, &input.rowset)
            })
    }

    fn accept(&mut self, index: usize, row: Row) -> Result<Row, StepError> {
        if let Some(shape) = self.inputs[index].rowset.shape() {
            if self
                .last_input_shape
                .as_ref()
                .is_none_or(|last| !Arc::ptr_eq(last, shape))
            {
                if self.context.options().safe_mode {
                    let reference = self.reference_shape.get_or_insert_with(|| Arc::clone(shape));
                    if !Arc::ptr_eq(reference, shape) {
                        reference.check_compatible(shape).context(LayoutSnafu)?;
                    }
                }
                self.last_input_shape = Some(Arc::clone(shape));
            }
        }
        let lines_read = self.counters.add_read();
        let feedback_size = self.context.options().feedback_size;
        if feedback_size > 0 && lines_read % feedback_size == 0 {
            emit!(StepProgress {
                step: &self.step,
                copy: self.copy,
                lines_read,
                lines_written: self.counters.lines_written(),
            });
        }
        Ok(row)
    }

    /// Shape of the rows coming from `step`, without consuming any row.
    ///
    /// Waits until the producer declared a shape or wrote its first row.
    /// Returns `Ok(None)` if it finished without doing either.
    pub fn input_shape_from(&mut self, step: &str) -> Result<Option<Arc<RowShape>>, StepError> {
        let rowsets = self
            .inputs
            .iter()
            .filter(|input| input.rowset.id().origin_step == step)
            .map(|input| Arc::clone(&input.rowset))
            .collect::<Vec<_>>();
        if rowsets.is_empty() {
            return Err(StepError::configuration(format!(
                "step {:?} does not read from {:?}",
                self.step, step
            )));
        }

        loop {
            let mut open = None;
            for rowset in &rowsets {
                if rowset.is_stopped() {
                    return Err(StepError::Cancelled);
                }
                let done = rowset.is_done();
                if let Some(shape) = rowset.shape() {
                    return Ok(Some(Arc::clone(shape)));
                }
                if !done && open.is_none() {
                    open = Some(rowset);
                }
            }
            let Some(open) = open else {
                return Ok(None);
            };
            if self.mode == IoMode::NonBlocking {
                return Err(StepError::Pending);
            }
            if self.control().is_stopped() {
                return Err(StepError::Cancelled);
            }
            match open.wait_for_shape(self.poll_interval()) {
                Ok(Some(shape)) => return Ok(Some(shape)),
                Ok(None) | Err(GetError::Empty) => {}
                Err(GetError::Stopped) => return Err(StepError::Cancelled),
            }
        }
    }

    /// Writes a row to the outputs chosen by the distribution policy.
    pub fn put_row(&mut self, row: Row) -> Result<(), StepError> {
        let shape = self.default_output_shape()?;
        self.route(None, &shape, row)
    }

    /// Writes a row to the outputs leading to `target` only.
    pub fn put_row_to(&mut self, target: &str, row: Row) -> Result<(), StepError> {
        let shape = self.default_output_shape()?;
        self.route(Some(target), &shape, row)
    }

    /// Writes a row whose shape differs from the step's output shape.
    pub fn put_row_shaped(&mut self, shape: &Arc<RowShape>, row: Row) -> Result<(), StepError> {
        self.route(None, shape, row)
    }

    pub fn put_row_to_shaped(
        &mut self,
        target: &str,
        shape: &Arc<RowShape>,
        row: Row,
    ) -> Result<(), StepError> {
        self.route(Some(target), shape, row)
    }

    fn default_output_shape(&self) -> Result<Arc<RowShape>, StepError> {
        self.output_shape
            .as_ref()
            .or(self.last_input_shape.as_ref())
            .cloned()
            .ok_or_else(|| {
                StepError::configuration(format!(
                    "step {:?} wrote a row before its output shape was known",
                    self.step
                ))
            })
    }

    fn route(
        &mut self,
        target: Option<&str>,
        shape: &Arc<RowShape>,
        row: Row,
    ) -> Result<(), StepError> {
        if let Some(target) = target {
            if !self.outputs.groups.iter().any(|group| group.step == target) {
                return Err(StepError::configuration(format!(
                    "step {:?} has no output to {:?}",
                    self.step, target
                )));
            }
        }
        if self.context.options().safe_mode {
            shape.conform(&row).context(LayoutSnafu)?;
        }

        let destinations = self.outputs.select(target, &row, shape)?;
        let Some((last, rest)) = destinations.split_last() else {
            return Ok(());
        };
        for rowset in rest {
            self.put_to(rowset, shape, row.clone())?;
        }
        self.put_to(last, shape, row)?;
        self.counters.add_written(1);
        Ok(())
    }

    fn put_to(&self, rowset: &RowSet, shape: &Arc<RowShape>, row: Row) -> Result<(), StepError> {
        let mut row = row;
        loop {
            match rowset.put(shape, row, self.poll_interval()) {
                Ok(()) => return Ok(()),
                Err(PutError::Full { row: rejected }) => {
                    if self.control().is_stopped() {
                        return Err(StepError::Cancelled);
                    }
                    row = rejected;
                }
                Err(PutError::Stopped { .. }) => return Err(StepError::Cancelled),
                Err(PutError::Closed { .. }) => {
                    return Err(StepError::failed(format!(
                        "row set {} was already marked done",
                        rowset.id()
                    )));
                }
                Err(PutError::ShapeMismatch { source, .. }) => {
                    return Err(StepError::Layout { source });
                }
            }
        }
    }

    /// Marks every output row set done.
    pub fn set_output_done(&self) {
        for rowset in self.outputs.rowsets() {
            rowset.set_done();
        }
    }

    /// Stops every input and output row set, flagging them errored if requested.
    pub fn stop_all_rowsets(&self, errored: bool) {
        let mut count = 0;
        for rowset in self.input_rowsets().chain(self.output_rowsets()) {
            if errored {
                rowset.set_error();
            } else {
                rowset.stop();
            }
            count += 1;
        }
        emit!(RowsetsStopped {
            step: &self.step,
            copy: self.copy,
            count,
            errored,
        });
    }
}

fn selects(from: Option<&str>, rowset: &RowSet) -> bool {
    from.is_none_or(|step| rowset.id().origin_step == step)
}
