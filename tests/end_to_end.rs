use std::sync::Arc;

use parking_lot::Mutex;
use rowflow::{
    config::{self, Format, StepMeta, TransformationConfig},
    context::TransContext,
    step::{boxed, BatchOutcome, Step, StepError, StepIo, StepRegistry, StepState},
    topology::{SingleThreadedExecutor, TransState, Transformation},
    Row, Value,
};
use similar_asserts::assert_eq;

/// Keeps every row it reads.
struct Collect(Arc<Mutex<Vec<Row>>>);

impl Step for Collect {
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
                self.0.lock().push(row);
                Ok(BatchOutcome::Continue)
            }
            None => Ok(BatchOutcome::Done),
        }
    }
}

fn registry() -> (StepRegistry, Arc<Mutex<Vec<Row>>>) {
    let rows = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StepRegistry::with_builtins();
    let collected = Arc::clone(&rows);
    registry.register("collect", move |_| Ok(boxed(Collect(Arc::clone(&collected)))));
    (registry, rows)
}

fn sequence_values(rows: &Mutex<Vec<Row>>, index: usize) -> Vec<i64> {
    let mut values = rows
        .lock()
        .iter()
        .filter_map(|row| row.get(index).and_then(Value::as_integer))
        .collect::<Vec<_>>();
    values.sort_unstable();
    values
}

const PARTITIONED: &str = r#"
name = "partitioned"

[options]
rowset_size = 32
poll_interval_ms = 5

[[partition_schemas]]
name = "three"
partitions = ["p0", "p1", "p2"]

[steps.gen]
type = "row_generator"
options = { limit = 100, fields = [{ name = "label", type = "string", value = "x" }] }

[steps.seq]
type = "add_sequence"
inputs = ["gen"]
options = { field_name = "id" }

[steps.work]
type = "dummy"
inputs = ["seq"]
partitioning = { schema = "three", method = "mod", fields = ["id"] }

[steps.out]
type = "collect"
inputs = ["work"]
"#;

#[test]
fn partitioned_transformation_from_toml() {
    let config = config::load_from_str(PARTITIONED, Format::Toml).unwrap();
    assert_eq!(config::check(&config), Ok(vec![]));
    let (registry, rows) = registry();

    let result =
        Transformation::execute(&config, TransContext::for_config(&config, Arc::new(registry)))
            .unwrap();

    assert_eq!(result.state, TransState::Finished);
    assert_eq!(sequence_values(&rows, 1), (1..=100).collect::<Vec<_>>());
    let per_partition = result
        .step("work")
        .map(|status| status.lines_read)
        .collect::<Vec<_>>();
    assert_eq!(per_partition, vec![33, 34, 33]);
    assert!(result
        .steps
        .iter()
        .all(|status| status.state == StepState::Finished));
}

#[test]
fn same_transformation_single_threaded() {
    let config = config::load_from_str(PARTITIONED, Format::Toml).unwrap();
    let (registry, rows) = registry();

    let result = SingleThreadedExecutor::execute(
        &config,
        TransContext::for_config(&config, Arc::new(registry)),
    )
    .unwrap();

    assert!(result.is_success());
    assert_eq!(sequence_values(&rows, 1), (1..=100).collect::<Vec<_>>());
}

const MAPPED: &str = r#"{
  "name": "mapped",
  "options": { "poll_interval_ms": 5 },
  "steps": {
    "gen": {
      "type": "row_generator",
      "options": { "limit": 25, "fields": [{ "name": "n", "type": "integer", "value": "3" }] }
    },
    "map": {
      "type": "mapping",
      "inputs": ["gen"],
      "options": {
        "execution": "single_threaded",
        "transformation": {
          "name": "numbering",
          "options": { "poll_interval_ms": 5 },
          "steps": {
            "in": { "type": "mapping_input" },
            "seq": { "type": "add_sequence", "inputs": ["in"], "options": { "start": 10 } },
            "out": { "type": "mapping_output", "inputs": ["seq"] }
          }
        }
      }
    },
    "out": { "type": "collect", "inputs": ["map"] }
  }
}"#;

#[test]
fn mapping_from_json() {
    let config: TransformationConfig = config::load_from_str(MAPPED, Format::Json).unwrap();
    let (registry, rows) = registry();
    let context = TransContext::for_config(&config, Arc::new(registry));

    let result = Transformation::execute(&config, context.clone()).unwrap();

    assert_eq!(result.state, TransState::Finished, "{:?}", result.first_error);
    assert_eq!(sequence_values(&rows, 1), (10..35).collect::<Vec<_>>());
    assert!(rows.lock().iter().all(|row| row.get(0) == Some(&Value::from(3_i64))));
    assert!(context.sub_transformations().is_empty());
    assert_eq!(context.sub_transformations().deregistered_total(), 1);
}

#[test]
fn invalid_graph_is_rejected_before_running() {
    let config = config::load_from_str(
        r#"
        [steps.out]
        type = "collect"
        inputs = ["nowhere"]
        "#,
        Format::Toml,
    )
    .unwrap();

    assert_eq!(
        config::check(&config),
        Err(vec!["Input \"nowhere\" for step \"out\" doesn't exist.".to_owned()])
    );
}
