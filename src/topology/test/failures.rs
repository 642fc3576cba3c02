use similar_asserts::assert_eq;

use super::{builder, rows, shape};
use crate::{
    config::{RunOptions, StepOuter},
    step::{StepError, StepRegistry, StepState},
    test_util::{
        context, fast_options,
        mock::{failing_init_step, failing_step, memory_sink, memory_source, tracked_step},
    },
    topology::{ExecutionError, SingleThreadedExecutor, TransState, Transformation},
};

#[test]
fn failed_init_aborts_before_any_worker_starts() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(10));
    let tracker = tracked_step(&mut registry, "tracked");
    failing_init_step(&mut registry, "broken");

    let mut builder = builder(fast_options());
    builder.add_step("in", &[], StepOuter::new("source"));
    builder.add_step("track", &["in"], StepOuter::new("tracked").with_copies(2));
    builder.add_step("out", &["track"], StepOuter::new("broken"));
    let config = builder.build().unwrap();

    let context = context(&config, registry);
    let error = Transformation::execute(&config, context.clone()).unwrap_err();

    match error {
        ExecutionError::Startup { step, copy, source } => {
            assert_eq!(step, "out");
            assert_eq!(copy, 0);
            assert!(matches!(source, StepError::Configuration { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tracker.inits(), 2);
    assert_eq!(tracker.disposes(), 2);
    assert_eq!(context.control().error_count(), 1);
    assert!(rowflow_core::internal_event::test_util::contains_name("StepInitFailed"));
}

#[test]
fn failed_init_in_single_threaded_mode() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(10));
    let tracker = tracked_step(&mut registry, "tracked");
    failing_init_step(&mut registry, "broken");

    let mut builder = builder(fast_options());
    builder.add_step("in", &[], StepOuter::new("source"));
    builder.add_step("track", &["in"], StepOuter::new("tracked").with_copies(2));
    builder.add_step("out", &["track"], StepOuter::new("broken"));
    let config = builder.build().unwrap();

    let error = SingleThreadedExecutor::execute(&config, context(&config, registry)).unwrap_err();

    assert!(matches!(error, ExecutionError::Startup { ref step, .. } if step == "out"));
    assert_eq!(tracker.inits(), 2);
    assert_eq!(tracker.disposes(), 2);
}

#[test]
fn step_error_stops_the_whole_run() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(1000));
    failing_step(&mut registry, "flaky", 10);
    let tracker = tracked_step(&mut registry, "tracked");
    let _collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(RunOptions {
        rowset_size: 8,
        ..fast_options()
    });
    builder.add_step("in", &[], StepOuter::new("source"));
    builder.add_step("fail", &["in"], StepOuter::new("flaky"));
    builder.add_step("track", &["fail"], StepOuter::new("tracked"));
    builder.add_step("out", &["track"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = Transformation::execute(&config, context(&config, registry)).unwrap();

    assert_eq!(result.state, TransState::Errored);
    assert_eq!(result.errors, 1);
    let failed = result.first_error.clone().unwrap();
    assert_eq!(failed.step, "fail");
    assert_eq!(failed.message, "gave up after 10 rows");
    assert_eq!(result.step("fail").next().unwrap().state, StepState::Errored);
    assert_eq!(result.step("in").next().unwrap().state, StepState::Stopped);
    assert!(result
        .steps
        .iter()
        .filter(|status| status.step != "fail")
        .all(|status| status.state != StepState::Errored));
    assert!(result.lines_written("in") < 1000);
    assert_eq!(tracker.disposes(), 1);

    match result.into_result() {
        Err(ExecutionError::Run { step, copy, message }) => {
            assert_eq!((step.as_str(), copy), ("fail", 0));
            assert_eq!(message, "gave up after 10 rows");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn step_error_in_single_threaded_mode() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(100));
    failing_step(&mut registry, "flaky", 3);
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("in", &[], StepOuter::new("source"));
    builder.add_step("fail", &["in"], StepOuter::new("flaky"));
    builder.add_step("out", &["fail"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = SingleThreadedExecutor::execute(&config, context(&config, registry)).unwrap();

    assert_eq!(result.state, TransState::Errored);
    assert_eq!(result.first_error.unwrap().step, "fail");
    // The sink ran after the failing step in every iteration before the failure.
    assert_eq!(collected.lock().len(), 3);
}
