use std::{thread, time::Duration};

use serde_json::json;

use super::builder;
use crate::{
    config::StepOuter,
    step::{StepRegistry, StepState},
    test_util::{context, fast_options, mock::memory_sink, wait_for},
    topology::{ExecutionError, TransState, Transformation},
};

fn endless() -> StepOuter {
    StepOuter::new("row_generator").with_options(json!({
        "never_ending": true,
        "fields": [{ "name": "id", "type": "integer", "value": "7" }],
    }))
}

#[test]
fn external_stop_is_a_cancellation() {
    let mut registry = StepRegistry::with_builtins();
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("gen", &[], endless());
    builder.add_step("pass", &["gen"], StepOuter::new("dummy"));
    builder.add_step("out", &["pass"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let mut transformation =
        Transformation::prepare(&config, context(&config, registry)).unwrap();
    assert_eq!(transformation.state(), TransState::Init);
    transformation.init_steps().unwrap();
    transformation.start_threads().unwrap();
    wait_for(|| collected.lock().len() > 100);
    assert_eq!(transformation.state(), TransState::Running);

    transformation.stop();
    let result = transformation.wait_until_finished();

    assert_eq!(result.state, TransState::Stopped);
    assert_eq!(result.errors, 0);
    assert!(result.first_error.is_none());
    assert!(result
        .steps
        .iter()
        .all(|status| status.state == StepState::Stopped));
    assert!(matches!(
        result.into_result(),
        Err(ExecutionError::Cancelled)
    ));
}

#[test]
fn paused_transformation_moves_no_rows() {
    let mut registry = StepRegistry::with_builtins();
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("gen", &[], endless());
    builder.add_step("out", &["gen"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let mut transformation =
        Transformation::prepare(&config, context(&config, registry)).unwrap();
    transformation.init_steps().unwrap();
    transformation.start_threads().unwrap();
    wait_for(|| !collected.lock().is_empty());

    transformation.pause_running_transformation();
    assert_eq!(transformation.state(), TransState::Paused);
    // Let in-flight batches complete.
    thread::sleep(Duration::from_millis(100));
    let paused_at = collected.lock().len();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(collected.lock().len(), paused_at);
    let lines = transformation
        .step_status()
        .iter()
        .map(|status| status.lines_written + status.lines_read)
        .collect::<Vec<_>>();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        transformation
            .step_status()
            .iter()
            .map(|status| status.lines_written + status.lines_read)
            .collect::<Vec<_>>(),
        lines
    );

    transformation.resume_running_transformation();
    wait_for(|| collected.lock().len() > paused_at);

    transformation.stop();
    assert_eq!(transformation.wait_until_finished().state, TransState::Stopped);
}

#[test]
fn dropping_a_running_transformation_stops_it() {
    let mut registry = StepRegistry::with_builtins();
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("gen", &[], endless());
    builder.add_step("out", &["gen"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let context = context(&config, registry);
    let mut transformation = Transformation::prepare(&config, context.clone()).unwrap();
    transformation.init_steps().unwrap();
    transformation.start_threads().unwrap();
    wait_for(|| !collected.lock().is_empty());

    drop(transformation);
    assert!(context.control().is_cancelled());
}
