use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{row::Row, value::ValueType};

/// Description of one column: name, semantic type and optional length/precision.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
        }
    }

    #[must_use]
    pub const fn with_length(mut self, length: u32, precision: Option<u32>) -> Self {
        self.length = Some(length);
        self.precision = precision;
        self
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum LayoutError {
    #[snafu(display(
        "The number of columns is not the same: expected {expected}, found {actual}"
    ))]
    ColumnCount { expected: usize, actual: usize },
    #[snafu(display(
        "Column #{index} ({name:?}) has type {actual} where {expected} was expected"
    ))]
    ColumnType {
        index: usize,
        name: String,
        expected: ValueType,
        actual: ValueType,
    },
}

/// Ordered column descriptor shared by every row flowing through one row set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RowShape {
    columns: Vec<ColumnMeta>,
}

impl RowShape {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.columns.push(ColumnMeta::new(name, value_type));
        self
    }

    pub fn push(&mut self, column: ColumnMeta) {
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnMeta> {
        self.columns.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    /// Safe-mode layout check used before two streams are merged.
    ///
    /// Two shapes are compatible when they have the same number of columns and
    /// every column pair shares the same semantic type. Column names may differ.
    pub fn check_compatible(&self, other: &RowShape) -> Result<(), LayoutError> {
        if self.len() != other.len() {
            return ColumnCountSnafu {
                expected: self.len(),
                actual: other.len(),
            }
            .fail();
        }
        for (index, (reference, compare)) in self.columns.iter().zip(&other.columns).enumerate() {
            if reference.value_type != compare.value_type {
                return ColumnTypeSnafu {
                    index,
                    name: compare.name.clone(),
                    expected: reference.value_type,
                    actual: compare.value_type,
                }
                .fail();
            }
            if reference.name != compare.name {
                tracing::debug!(
                    message = "Merged column names differ.",
                    index,
                    reference = %reference.name,
                    compare = %compare.name,
                );
            }
        }
        Ok(())
    }

    /// Checks that every non-null value of `row` matches its column's type.
    pub fn conform(&self, row: &Row) -> Result<(), LayoutError> {
        if self.len() != row.len() {
            return ColumnCountSnafu {
                expected: self.len(),
                actual: row.len(),
            }
            .fail();
        }
        for (index, (column, value)) in self.columns.iter().zip(row.values()).enumerate() {
            match value.value_type() {
                Some(actual) if actual != column.value_type => {
                    return ColumnTypeSnafu {
                        index,
                        name: column.name.clone(),
                        expected: column.value_type,
                        actual,
                    }
                    .fail()
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FromIterator<ColumnMeta> for RowShape {
    fn from_iter<I: IntoIterator<Item = ColumnMeta>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for RowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", column.name, column.value_type)?;
        }
        f.write_str("]")
    }
}
