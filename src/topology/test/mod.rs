use std::sync::Arc;

use parking_lot::Mutex;
use rowflow_core::{
    internal_event::test_util as events, PartitionMethod, PartitionSchema, Row, RowShape,
    ValueType,
};
use serde_json::json;
use similar_asserts::assert_eq;

use crate::{
    config::{ConfigBuilder, Distribution, RunOptions, StepOuter, TransformationConfig},
    step::{StepRegistry, StepState},
    test_util::{
        context, fast_options,
        mock::{memory_sink, memory_source},
        trace_init,
    },
    topology::{TransState, Transformation},
};

mod control;
mod failures;
mod mapping;

fn shape() -> RowShape {
    RowShape::default()
        .with_column("id", ValueType::Integer)
        .with_column("name", ValueType::String)
}

/// Same width as [`shape`], with the column types swapped.
fn swapped_shape() -> RowShape {
    RowShape::default()
        .with_column("label", ValueType::String)
        .with_column("n", ValueType::Integer)
}

fn rows(count: i64) -> Vec<Row> {
    (0..count).map(|id| row![id, format!("row {id}")]).collect()
}

fn ids(rows: &Mutex<Vec<Row>>) -> Vec<i64> {
    rows.lock()
        .iter()
        .filter_map(|row| row[0].as_integer())
        .collect()
}

fn builder(options: RunOptions) -> ConfigBuilder {
    trace_init();

    let mut builder = TransformationConfig::builder();
    builder.set_name("test");
    builder.set_options(options);
    builder
}

fn generator(limit: u64) -> StepOuter {
    StepOuter::new("row_generator").with_options(json!({
        "limit": limit,
        "fields": [{ "name": "name", "type": "string", "value": "generated" }],
    }))
}

#[test]
fn pass_through_chain_keeps_every_row_in_order() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(1000));
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(RunOptions {
        rowset_size: 16,
        ..fast_options()
    });
    builder.add_step("a", &[], StepOuter::new("source"));
    builder.add_step("b", &["a"], StepOuter::new("dummy"));
    builder.add_step("c", &["b"], StepOuter::new("dummy"));
    builder.add_step("out", &["c"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = Transformation::execute(&config, context(&config, registry)).unwrap();

    assert_eq!(result.state, TransState::Finished);
    assert!(result.is_success());
    assert_eq!(result.lines_written("c"), 1000);
    assert_eq!(ids(&collected), (0..1000).collect::<Vec<_>>());
    for step in ["a", "b", "c"] {
        let status = result.step(step).next().unwrap();
        assert_eq!(status.errors, 0);
        assert_eq!(status.state, StepState::Finished);
    }
    assert!(events::contains_name("TransformationFinished"));
}

#[test]
fn append_emits_head_then_tail() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "heads", shape(), vec![row![1, "h1"], row![2, "h2"]]);
    memory_source(&mut registry, "tails", shape(), vec![row![3, "t1"], row![4, "t2"]]);
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("head", &[], StepOuter::new("heads"));
    builder.add_step("tail", &[], StepOuter::new("tails"));
    builder.add_step(
        "append",
        &["head", "tail"],
        StepOuter::new("append")
            .with_input_role("head", "head")
            .with_input_role("tail", "tail"),
    );
    builder.add_step("out", &["append"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = Transformation::execute(&config, context(&config, registry)).unwrap();

    assert!(result.is_success());
    assert_eq!(
        *collected.lock(),
        vec![row![1, "h1"], row![2, "h2"], row![3, "t1"], row![4, "t2"]]
    );
}

#[test]
fn append_rejects_incompatible_tail_before_reading_it() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "heads", shape(), vec![row![1, "h1"], row![2, "h2"]]);
    memory_source(
        &mut registry,
        "tails",
        RowShape::default().with_column("label", ValueType::String),
        vec![row!["t1"], row!["t2"]],
    );
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("head", &[], StepOuter::new("heads"));
    builder.add_step("tail", &[], StepOuter::new("tails"));
    builder.add_step(
        "append",
        &["head", "tail"],
        StepOuter::new("append")
            .with_input_role("head", "head")
            .with_input_role("tail", "tail"),
    );
    builder.add_step("out", &["append"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = Transformation::execute(&config, context(&config, registry)).unwrap();

    assert_eq!(result.state, TransState::Errored);
    let failed = result.first_error.clone().unwrap();
    assert_eq!(failed.step, "append");
    assert!(failed.message.contains("number of columns"), "{}", failed.message);
    assert_eq!(result.lines_read("append"), 2);
    assert!(collected.lock().iter().all(|row| row.len() == 2));
    assert!(events::contains_name("LayoutMismatch"));
}

#[test]
fn append_rejects_tail_with_other_column_types() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "heads", shape(), vec![row![1, "h1"], row![2, "h2"]]);
    memory_source(
        &mut registry,
        "tails",
        swapped_shape(),
        vec![row!["t1", 3], row!["t2", 4]],
    );
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("head", &[], StepOuter::new("heads"));
    builder.add_step("tail", &[], StepOuter::new("tails"));
    builder.add_step(
        "append",
        &["head", "tail"],
        StepOuter::new("append")
            .with_input_role("head", "head")
            .with_input_role("tail", "tail"),
    );
    builder.add_step("out", &["append"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = Transformation::execute(&config, context(&config, registry)).unwrap();

    assert_eq!(result.state, TransState::Errored);
    let failed = result.first_error.clone().unwrap();
    assert_eq!(failed.step, "append");
    assert!(failed.message.contains("Column #0"), "{}", failed.message);
    assert_eq!(*collected.lock(), vec![row![1, "h1"], row![2, "h2"]]);
}

#[test]
fn merged_streams_with_other_column_types_fail() {
    for safe_mode in [true, false] {
        let mut registry = StepRegistry::with_builtins();
        memory_source(&mut registry, "left", shape(), vec![row![1, "a"]]);
        memory_source(&mut registry, "right", swapped_shape(), vec![row!["x", 2]]);
        let collected = memory_sink(&mut registry, "sink");

        let mut builder = builder(RunOptions {
            safe_mode,
            ..fast_options()
        });
        builder.add_step("left", &[], StepOuter::new("left"));
        builder.add_step("right", &[], StepOuter::new("right"));
        builder.add_step("merge", &["left", "right"], StepOuter::new("dummy"));
        builder.add_step("out", &["merge"], StepOuter::new("sink"));
        let config = builder.build().unwrap();

        let result = Transformation::execute(&config, context(&config, registry)).unwrap();

        assert_eq!(result.state, TransState::Errored, "safe_mode={safe_mode}");
        let failed = result.first_error.clone().unwrap();
        assert_eq!(failed.step, "merge");
        assert!(failed.message.contains("Column #0"), "{}", failed.message);
        assert!(collected.lock().len() <= 1);
    }
}

#[test]
fn copy_and_distribute() {
    let run = |distribution: Distribution| {
        let mut registry = StepRegistry::with_builtins();
        memory_source(&mut registry, "source", shape(), rows(10));
        let left = memory_sink(&mut registry, "left");
        let right = memory_sink(&mut registry, "right");

        let mut builder = builder(fast_options());
        builder.add_step("in", &[], StepOuter::new("source"));
        builder.add_step(
            "fan",
            &["in"],
            StepOuter::new("dummy").with_distribution(distribution),
        );
        builder.add_step("left", &["fan"], StepOuter::new("left"));
        builder.add_step("right", &["fan"], StepOuter::new("right"));
        let config = builder.build().unwrap();

        let result = Transformation::execute(&config, context(&config, registry)).unwrap();
        assert!(result.is_success());
        (ids(&left), ids(&right))
    };

    let (left, right) = run(Distribution::Copy);
    assert_eq!(left, (0..10).collect::<Vec<_>>());
    assert_eq!(right, (0..10).collect::<Vec<_>>());

    let (left, right) = run(Distribution::Distribute);
    assert_eq!(left, vec![0, 2, 4, 6, 8]);
    assert_eq!(right, vec![1, 3, 5, 7, 9]);
}

#[test]
fn distribute_spreads_rows_over_copies() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(30));
    let collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("in", &[], StepOuter::new("source"));
    builder.add_step("work", &["in"], StepOuter::new("dummy").with_copies(3));
    builder.add_step("out", &["work"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let result = Transformation::execute(&config, context(&config, registry)).unwrap();

    assert!(result.is_success());
    let per_copy = result
        .step("work")
        .map(|status| status.lines_read)
        .collect::<Vec<_>>();
    assert_eq!(per_copy, vec![10, 10, 10]);
    let mut ids = ids(&collected);
    ids.sort_unstable();
    assert_eq!(ids, (0..30).collect::<Vec<_>>());
}

#[test]
fn partitioned_hop_routes_by_key() {
    let run = |method: PartitionMethod| {
        let mut registry = StepRegistry::with_builtins();
        memory_source(
            &mut registry,
            "source",
            shape(),
            vec![row![0, "a"], row![3, "b"], row![6, "c"], row![1, "d"]],
        );
        let collected = memory_sink(&mut registry, "sink");

        let mut builder = builder(fast_options());
        builder.add_partition_schema(PartitionSchema::new("p", ["P1", "P2", "P3"]));
        builder.add_step("in", &[], StepOuter::new("source"));
        builder.add_step(
            "part",
            &["in"],
            StepOuter::new("dummy").partitioned("p", method, ["id"]),
        );
        builder.add_step("out", &["part"], StepOuter::new("sink"));
        let config = builder.build().unwrap();

        let result = Transformation::execute(&config, context(&config, registry)).unwrap();
        assert!(result.is_success());
        let per_copy = result
            .step("part")
            .map(|status| status.lines_read)
            .collect::<Vec<_>>();
        (per_copy, collected.lock().len())
    };

    assert_eq!(run(PartitionMethod::Mod), (vec![3, 1, 0], 4));
    assert_eq!(run(PartitionMethod::Mirror), (vec![4, 4, 4], 12));
}

#[test]
fn shared_sequence_counter_spans_steps() {
    let mut registry = StepRegistry::with_builtins();
    let collected = memory_sink(&mut registry, "sink");
    let sequence = || {
        StepOuter::new("add_sequence").with_options(json!({
            "field_name": "seq",
            "shared_counter": "ids",
        }))
    };

    let mut builder = builder(fast_options());
    builder.add_step(
        "gen",
        &[],
        generator(5).with_distribution(Distribution::Copy),
    );
    builder.add_step("seq_a", &["gen"], sequence());
    builder.add_step("seq_b", &["gen"], sequence());
    builder.add_step("out", &["seq_a", "seq_b"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let context = context(&config, registry);
    let result = Transformation::execute(&config, context.clone()).unwrap();

    assert!(result.is_success());
    let mut values = collected
        .lock()
        .iter()
        .filter_map(|row| row[1].as_integer())
        .collect::<Vec<_>>();
    values.sort_unstable();
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
    assert!(context.resources().is_empty());
}

#[test]
fn declared_output_shape_is_visible_before_the_first_row() {
    let mut registry = StepRegistry::with_builtins();
    memory_source(&mut registry, "source", shape(), rows(3));
    let _collected = memory_sink(&mut registry, "sink");

    let mut builder = builder(fast_options());
    builder.add_step("in", &[], StepOuter::new("source").with_output_shape(shape()));
    builder.add_step("out", &["in"], StepOuter::new("sink"));
    let config = builder.build().unwrap();

    let pieces = super::build_pieces(
        &config,
        context(&config, registry),
        super::ExecutionMode::Threaded,
    )
    .unwrap();
    assert_eq!(pieces.rowsets.len(), 1);
    assert_eq!(pieces.rowsets[0].shape(), Some(&Arc::new(shape())));
}
