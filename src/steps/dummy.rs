use crate::{
    config::StepMeta,
    step::{BatchOutcome, Step, StepError, StepIo},
};

/// Passes every row through unchanged.
///
/// Also serves as the `mapping_input` and `mapping_output` boundary steps of a
/// sub-transformation, which only need to relay rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dummy;

impl Step for Dummy {
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
                io.put_row(row)?;
                Ok(BatchOutcome::Continue)
            }
            None => Ok(BatchOutcome::Done),
        }
    }
}
