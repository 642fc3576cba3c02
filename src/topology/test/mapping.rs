use std::sync::Arc;

use similar_asserts::assert_eq;

use super::{builder, ids, rows, shape};
use crate::{
    config::{StepOuter, TransformationConfig},
    context::TransContext,
    step::{StepError, StepRegistry},
    steps::mapping::{InputMapping, MappingConfig, MAPPING_INPUT, MAPPING_OUTPUT},
    test_util::{
        context, fast_options,
        mock::{memory_sink, memory_source},
    },
    topology::{
        build_pieces, ExecutionError, ExecutionMode, SingleThreadedExecutor, TransState,
        Transformation,
    },
};

fn nested() -> TransformationConfig {
    let mut builder = builder(fast_options());
    builder.set_name("nested");
    builder.add_step("in", &[], StepOuter::new(MAPPING_INPUT));
    builder.add_step("work", &["in"], StepOuter::new("dummy"));
    builder.add_step("out", &["work"], StepOuter::new(MAPPING_OUTPUT));
    builder.build().unwrap()
}

fn outer(mapping: &MappingConfig) -> TransformationConfig {
    let mut builder = builder(fast_options());
    builder.add_step("in", &[], StepOuter::new("source"));
    builder.add_step(
        "map",
        &["in"],
        StepOuter::new("mapping").with_options(serde_json::to_value(mapping).unwrap()),
    );
    builder.add_step("out", &["map"], StepOuter::new("sink"));
    builder.build().unwrap()
}

fn mapping(execution: ExecutionMode) -> MappingConfig {
    MappingConfig {
        transformation: nested(),
        execution,
        ..MappingConfig::default()
    }
}

#[test]
fn mapping_relays_rows_through_the_sub_transformation() {
    for (outer_mode, nested_mode) in [
        (ExecutionMode::Threaded, ExecutionMode::Threaded),
        (ExecutionMode::Threaded, ExecutionMode::SingleThreaded),
        (ExecutionMode::SingleThreaded, ExecutionMode::SingleThreaded),
        (ExecutionMode::SingleThreaded, ExecutionMode::Threaded),
    ] {
        let mut registry = StepRegistry::with_builtins();
        memory_source(&mut registry, "source", shape(), rows(50));
        let collected = memory_sink(&mut registry, "sink");
        let config = outer(&mapping(nested_mode));
        let context = context(&config, registry);

        let result = match outer_mode {
            ExecutionMode::Threaded => Transformation::execute(&config, context.clone()),
            ExecutionMode::SingleThreaded => {
                SingleThreadedExecutor::execute(&config, context.clone())
            }
        }
        .unwrap();

        assert_eq!(result.state, TransState::Finished, "{outer_mode:?}/{nested_mode:?}");
        assert_eq!(ids(&collected), (0..50).collect::<Vec<_>>());
        assert_eq!(result.lines_written("map"), 50);

        let subs = context.sub_transformations();
        assert!(subs.is_empty());
        assert_eq!(subs.registered_total(), 1);
        assert_eq!(subs.deregistered_total(), 1);
    }
}

#[test]
fn missing_mapping_target_fails_init() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(5));
    let _collected = memory_sink(&mut registry, "sink");
    let config = outer(&MappingConfig {
        input_mappings: vec![InputMapping {
            outer_step: None,
            nested_step: Some("absent".to_owned()),
        }],
        ..mapping(ExecutionMode::SingleThreaded)
    });
    let context = context(&config, registry);

    let error = Transformation::execute(&config, context.clone()).unwrap_err();

    match error {
        ExecutionError::Startup { step, source, .. } => {
            assert_eq!(step, "map");
            assert!(matches!(source, StepError::Configuration { .. }));
            assert!(source.to_string().contains("\"absent\""));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(context.sub_transformations().registered_total(), 0);
}

#[test]
fn nested_failure_fails_the_mapping_step() {
    let mut nested = TransformationConfig::builder();
    nested.set_options(fast_options());
    nested.add_step("in", &[], StepOuter::new(MAPPING_INPUT));
    nested.add_step("boom", &["in"], StepOuter::new("flaky"));
    nested.add_step("out", &["boom"], StepOuter::new(MAPPING_OUTPUT));
    let nested = nested.build().unwrap();

    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(20));
    crate::test_util::mock::failing_step(&mut registry, "flaky", 2);
    let _collected = memory_sink(&mut registry, "sink");
    let config = outer(&MappingConfig {
        transformation: nested,
        ..mapping(ExecutionMode::SingleThreaded)
    });
    let context = context(&config, registry);

    let result = Transformation::execute(&config, context.clone()).unwrap();

    assert_eq!(result.state, TransState::Errored);
    let failed = result.first_error.unwrap();
    assert_eq!(failed.step, "map");
    assert!(failed.message.contains("gave up after 2 rows"), "{}", failed.message);
    assert_eq!(context.sub_transformations().deregistered_total(), 1);
}

#[test]
fn mapping_dispose_is_idempotent() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(5));
    let _collected = memory_sink(&mut registry, "sink");
    let config = outer(&mapping(ExecutionMode::Threaded));
    let context = context(&config, registry);

    let mut pieces =
        build_pieces(&config, context.clone(), ExecutionMode::SingleThreaded).unwrap();
    let map = pieces
        .copies
        .iter_mut()
        .find(|copy| copy.step() == "map")
        .unwrap();
    map.init().unwrap();
    assert_eq!(context.sub_transformations().keys(), vec!["map.0".to_owned()]);

    assert!(map.dispose());
    assert!(!map.dispose());

    let subs = context.sub_transformations();
    assert!(subs.is_empty());
    assert_eq!(subs.registered_total(), 1);
    assert_eq!(subs.deregistered_total(), 1);
    assert!(rowflow_core::internal_event::test_util::contains_name(
        "SubTransformationDeregistered"
    ));
}

#[test]
fn mapping_leaves_a_foreign_registration_alone() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(5));
    let _collected = memory_sink(&mut registry, "sink");
    let config = outer(&mapping(ExecutionMode::SingleThreaded));
    let context = context(&config, registry);

    let other = TransContext::new("other", fast_options(), Arc::new(StepRegistry::default()));
    assert!(context.sub_transformations().add("map.0", other));

    let mut pieces =
        build_pieces(&config, context.clone(), ExecutionMode::SingleThreaded).unwrap();
    let map = pieces
        .copies
        .iter_mut()
        .find(|copy| copy.step() == "map")
        .unwrap();
    map.init().unwrap();
    assert!(map.dispose());

    let subs = context.sub_transformations();
    assert_eq!(subs.keys(), vec!["map.0".to_owned()]);
    assert_eq!(subs.registered_total(), 1);
    assert_eq!(subs.deregistered_total(), 0);
}

#[test]
fn stopping_the_parent_stops_the_nested_run() {
    let mut registry = StepRegistry::with_builtins();
    let collected = memory_sink(&mut registry, "sink");

    let mut nested = TransformationConfig::builder();
    nested.set_options(fast_options());
    nested.add_step(
        "gen",
        &[],
        StepOuter::new("row_generator").with_options(serde_json::json!({
            "never_ending": true,
            "fields": [{ "name": "id", "type": "integer", "value": "1" }],
        })),
    );
    nested.add_step("out", &["gen"], StepOuter::new(MAPPING_OUTPUT));
    let nested = nested.build().unwrap();

    let mut builder = builder(fast_options());
    builder.add_step(
        "map",
        &[],
        StepOuter::new("mapping").with_options(
            serde_json::to_value(MappingConfig {
                transformation: nested,
                ..mapping(ExecutionMode::Threaded)
            })
            .unwrap(),
        ),
    );
    builder.add_step("out", &["map"], StepOuter::new("sink"));
    let config = builder.build().unwrap();
    let context = context(&config, registry);

    let mut transformation = Transformation::prepare(&config, context.clone()).unwrap();
    transformation.init_steps().unwrap();
    transformation.start_threads().unwrap();
    crate::test_util::wait_for(|| collected.lock().len() > 10);
    assert_eq!(context.sub_transformations().len(), 1);

    transformation.stop();
    let result = transformation.wait_until_finished();

    assert_eq!(result.state, TransState::Stopped);
    assert!(context.sub_transformations().is_empty());
}
