use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use rowflow_core::{Row, RowShape};

use crate::{
    config::StepMeta,
    step::{boxed, BatchOutcome, Step, StepError, StepIo, StepRegistry},
};

/// Writes a fixed list of rows, then finishes.
#[derive(Clone, Debug)]
pub struct MemorySource {
    shape: Arc<RowShape>,
    rows: Arc<Vec<Row>>,
}

impl Step for MemorySource {
    type Data = usize;

    fn init(&self, _meta: &StepMeta, io: &mut StepIo) -> Result<usize, StepError> {
        io.set_output_shape(Arc::clone(&self.shape));
        Ok(0)
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        next: &mut usize,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        let Some(row) = self.rows.get(*next) else {
            return Ok(BatchOutcome::Done);
        };
        io.put_row(row.clone())?;
        *next += 1;
        Ok(BatchOutcome::Continue)
    }
}

pub fn memory_source(
    registry: &mut StepRegistry,
    step_type: &str,
    shape: RowShape,
    rows: Vec<Row>,
) {
    let source = MemorySource {
        shape: Arc::new(shape),
        rows: Arc::new(rows),
    };
    registry.register(step_type, move |_| Ok(boxed(source.clone())));
}

/// Collects every row it reads. All copies share one collection.
#[derive(Clone, Debug)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl Step for MemorySink {
    type Data = ();

    fn init(&self, _meta: &StepMeta, _io: &mut StepIo) -> Result<(), StepError> {
        Ok(())
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        _data: &mut (),
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        match io.get_row()? {
            Some(row) => {
                self.rows.lock().push(row);
                Ok(BatchOutcome::Continue)
            }
            None => Ok(BatchOutcome::Done),
        }
    }
}

pub fn memory_sink(registry: &mut StepRegistry, step_type: &str) -> Arc<Mutex<Vec<Row>>> {
    let rows = Arc::new(Mutex::new(Vec::new()));
    let sink = MemorySink {
        rows: Arc::clone(&rows),
    };
    registry.register(step_type, move |_| Ok(boxed(sink.clone())));
    rows
}

/// Passes rows through and fails once it has passed `after_rows` of them.
#[derive(Clone, Copy, Debug)]
pub struct FailingStep {
    after_rows: u64,
}

impl Step for FailingStep {
    type Data = u64;

    fn init(&self, _meta: &StepMeta, _io: &mut StepIo) -> Result<u64, StepError> {
        Ok(0)
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        passed: &mut u64,
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        if *passed >= self.after_rows {
            return Err(StepError::failed(format!(
                "gave up after {} rows",
                self.after_rows
            )));
        }
        match io.get_row()? {
            Some(row) => {
                io.put_row(row)?;
                *passed += 1;
                Ok(BatchOutcome::Continue)
            }
            None => Ok(BatchOutcome::Done),
        }
    }
}

pub fn failing_step(registry: &mut StepRegistry, step_type: &str, after_rows: u64) {
    registry.register(step_type, move |_| Ok(boxed(FailingStep { after_rows })));
}

/// Refuses to initialize.
#[derive(Clone, Copy, Debug)]
pub struct FailingInitStep;

impl Step for FailingInitStep {
    type Data = ();

    fn init(&self, _meta: &StepMeta, _io: &mut StepIo) -> Result<(), StepError> {
        Err(StepError::configuration("init refused"))
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        _data: &mut (),
        _io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        Ok(BatchOutcome::Done)
    }
}

pub fn failing_init_step(registry: &mut StepRegistry, step_type: &str) {
    registry.register(step_type, |_| Ok(boxed(FailingInitStep)));
}

/// Passes rows through, sleeping before each one.
#[derive(Clone, Copy, Debug)]
pub struct SlowStep {
    delay: Duration,
}

impl Step for SlowStep {
    type Data = ();

    fn init(&self, _meta: &StepMeta, _io: &mut StepIo) -> Result<(), StepError> {
        Ok(())
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        _data: &mut (),
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        match io.get_row()? {
            Some(row) => {
                std::thread::sleep(self.delay);
                io.put_row(row)?;
                Ok(BatchOutcome::Continue)
            }
            None => Ok(BatchOutcome::Done),
        }
    }
}

pub fn slow_step(registry: &mut StepRegistry, step_type: &str, delay: Duration) {
    registry.register(step_type, move |_| Ok(boxed(SlowStep { delay })));
}

/// Counts lifecycle calls of every copy of a pass-through step.
#[derive(Clone, Debug, Default)]
pub struct StepTracker {
    pub inits: Arc<AtomicUsize>,
    pub disposes: Arc<AtomicUsize>,
}

impl StepTracker {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }
}

impl Step for StepTracker {
    type Data = ();

    fn init(&self, _meta: &StepMeta, _io: &mut StepIo) -> Result<(), StepError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process_one_batch(
        &self,
        _meta: &StepMeta,
        _data: &mut (),
        io: &mut StepIo,
    ) -> Result<BatchOutcome, StepError> {
        match io.get_row()? {
            Some(row) => {
                io.put_row(row)?;
                Ok(BatchOutcome::Continue)
            }
            None => Ok(BatchOutcome::Done),
        }
    }

    fn dispose(&self, _meta: &StepMeta, _data: (), _io: &mut StepIo) {
        self.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn tracked_step(registry: &mut StepRegistry, step_type: &str) -> StepTracker {
    let tracker = StepTracker::default();
    let step = tracker.clone();
    registry.register(step_type, move |_| Ok(boxed(step.clone())));
    tracker
}
