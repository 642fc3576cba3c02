use std::{fmt, hash::Hasher};

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use twox_hash::XxHash64;

use crate::{row::Row, shape::RowShape, value::Value};

/// Named, ordered set of partition identifiers.
///
/// The position of an identifier in `partitions` is the index of the step copy
/// that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionSchema {
    pub name: String,
    pub partitions: Vec<String>,
}

impl PartitionSchema {
    pub fn new<I, S>(name: impl Into<String>, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            partitions: partitions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn partition_id(&self, index: usize) -> Option<&str> {
        self.partitions.get(index).map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMethod {
    /// Hash-mod over the key fields: every row goes to exactly one partition.
    #[default]
    Mod,
    /// Every row goes to every partition.
    Mirror,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PartitionError {
    #[snafu(display("Partitioning field {field:?} is not part of the row shape"))]
    UnknownField { field: String },
    #[snafu(display("Partition schema has no partitions"))]
    EmptySchema,
    #[snafu(display("No partitioning fields were configured"))]
    NoKeyFields,
}

/// Calculate the partition index for a row.
///
/// Implementations must be pure: the same row, shape and configuration always
/// yield the same index.
pub trait Partitioner: Send + Sync + fmt::Debug {
    fn partition_count(&self) -> usize;

    fn partition(&self, row: &Row, shape: &RowShape) -> Result<usize, PartitionError>;
}

/// Default partitioner: hash-mod over the configured key fields.
///
/// A single integer key uses `abs(value) % n` so that numeric keys spread the
/// same way they would be spread by hand. Any other key combination is hashed
/// with a zero-seeded xxHash64 over a platform independent encoding.
#[derive(Clone, Debug)]
pub struct ModPartitioner {
    fields: Vec<String>,
    count: usize,
}

impl ModPartitioner {
    pub fn new(fields: Vec<String>, count: usize) -> Result<Self, PartitionError> {
        if count == 0 {
            return EmptySchemaSnafu.fail();
        }
        if fields.is_empty() {
            return NoKeyFieldsSnafu.fail();
        }
        Ok(Self { fields, count })
    }

    pub fn for_schema(
        fields: Vec<String>,
        schema: &PartitionSchema,
    ) -> Result<Self, PartitionError> {
        Self::new(fields, schema.len())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn key_index(&self, shape: &RowShape, field: &str) -> Result<usize, PartitionError> {
        shape.index_of(field).ok_or_else(|| PartitionError::UnknownField {
            field: field.to_owned(),
        })
    }
}

impl Partitioner for ModPartitioner {
    fn partition_count(&self) -> usize {
        self.count
    }

    fn partition(&self, row: &Row, shape: &RowShape) -> Result<usize, PartitionError> {
        let count = self.count as u64;
        if let [field] = self.fields.as_slice() {
            let index = self.key_index(shape, field)?;
            if let Some(Value::Integer(value)) = row.get(index) {
                return Ok((value.unsigned_abs() % count) as usize);
            }
        }

        let mut hasher = XxHash64::with_seed(0);
        for field in &self.fields {
            let index = self.key_index(shape, field)?;
            row.get(index).unwrap_or(&Value::Null).hash_stable(&mut hasher);
        }
        Ok((hasher.finish() % count) as usize)
    }
}

/// Assigns `row` to one of the schema's partition identifiers using the
/// default hash-mod scheme over `fields`.
pub fn assign_partition<'a>(
    row: &Row,
    shape: &RowShape,
    schema: &'a PartitionSchema,
    fields: &[String],
) -> Result<&'a str, PartitionError> {
    let partitioner = ModPartitioner::for_schema(fields.to_vec(), schema)?;
    let index = partitioner.partition(row, shape)?;
    schema
        .partition_id(index)
        .ok_or(PartitionError::EmptySchema)
}
