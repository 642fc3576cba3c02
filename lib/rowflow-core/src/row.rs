use std::{fmt, ops::Index};

use serde::Serialize;

use crate::value::Value;

/// An ordered sequence of values. The column layout lives in a separate
/// [`RowShape`](crate::RowShape) shared by every row of a [`RowSet`](crate::RowSet).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(Vec<Value>);

impl Row {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }

    /// Replaces the value at `index`, returning the previous one.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Option<Value> {
        self.0
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value.into()))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

/// Builds a [`Row`] from a list of expressions convertible into [`Value`].
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::Row::from(vec![$($crate::Value::from($value)),+])
    };
}
