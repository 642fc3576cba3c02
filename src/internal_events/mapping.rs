use metrics::{counter, gauge};
use rowflow_core::internal_event::InternalEvent;

#[derive(Debug)]
pub struct SubTransformationRegistered<'a> {
    pub key: &'a str,
    pub active: usize,
}

impl InternalEvent for SubTransformationRegistered<'_> {
    fn emit(self) {
        debug!(message = "Sub-transformation registered.", key = %self.key, active = self.active);
        counter!("sub_transformations_registered_total").increment(1);
        gauge!("active_sub_transformations").set(self.active as f64);
    }
}

#[derive(Debug)]
pub struct SubTransformationDeregistered<'a> {
    pub key: &'a str,
    pub active: usize,
}

impl InternalEvent for SubTransformationDeregistered<'_> {
    fn emit(self) {
        debug!(message = "Sub-transformation deregistered.", key = %self.key, active = self.active);
        counter!("sub_transformations_deregistered_total").increment(1);
        gauge!("active_sub_transformations").set(self.active as f64);
    }

    fn name(&self) -> Option<&'static str> {
        Some("SubTransformationDeregistered")
    }
}
