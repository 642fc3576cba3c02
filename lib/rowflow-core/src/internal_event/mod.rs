//! Internal events are the single place where the engine reports what happened:
//! every event logs through `tracing` and updates `metrics` counters in its
//! `emit` body, keeping call sites to a single `emit!(...)` line.

mod prelude;
#[cfg(any(test, feature = "test"))]
pub mod test_util;

pub use prelude::{error_stage, error_type};

pub trait InternalEvent: Sized {
    fn emit(self);

    fn name(&self) -> Option<&'static str> {
        None
    }
}

#[cfg(any(test, feature = "test"))]
pub fn emit(event: impl InternalEvent) {
    if let Some(name) = event.name() {
        test_util::record_internal_event(name);
    }
    event.emit();
}

#[cfg(not(any(test, feature = "test")))]
pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_event::emit($event)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl InternalEvent for Probe {
        fn emit(self) {}

        fn name(&self) -> Option<&'static str> {
            Some("InternalEventProbe")
        }
    }

    #[test]
    fn named_events_are_recorded() {
        emit!(Probe);
        assert!(test_util::contains_name("InternalEventProbe"));
        assert!(test_util::recorded_count("InternalEventProbe") >= 1);
    }
}
