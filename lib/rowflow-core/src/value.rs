use std::{fmt, hash::Hasher};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Semantic type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Number,
    String,
    Boolean,
    Timestamp,
    Binary,
}

impl ValueType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Snafu)]
pub enum ValueParseError {
    #[snafu(display("Invalid integer {input:?}: {source}"))]
    Integer {
        input: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("Invalid number {input:?}: {source}"))]
    Number {
        input: String,
        source: std::num::ParseFloatError,
    },
    #[snafu(display("Invalid boolean {input:?}"))]
    Boolean { input: String },
    #[snafu(display("Invalid timestamp {input:?}: {source}"))]
    Timestamp {
        input: String,
        source: chrono::ParseError,
    },
}

/// A single typed cell of a [`Row`](crate::Row).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Number(f64),
    String(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Binary(Bytes),
}

impl Value {
    /// The semantic type of this value, `None` for nulls which fit every column.
    pub const fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ValueType::Integer),
            Self::Number(_) => Some(ValueType::Number),
            Self::String(_) => Some(ValueType::String),
            Self::Boolean(_) => Some(ValueType::Boolean),
            Self::Timestamp(_) => Some(ValueType::Timestamp),
            Self::Binary(_) => Some(ValueType::Binary),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Parses the textual form of a value of the given type. Empty input is null.
    pub fn parse(value_type: ValueType, input: &str) -> Result<Self, ValueParseError> {
        if input.is_empty() {
            return Ok(Self::Null);
        }
        Ok(match value_type {
            ValueType::Integer => Self::Integer(
                input
                    .trim()
                    .parse()
                    .context(IntegerSnafu { input })?,
            ),
            ValueType::Number => {
                Self::Number(input.trim().parse().context(NumberSnafu { input })?)
            }
            ValueType::String => Self::String(input.to_owned()),
            ValueType::Boolean => match input.trim().to_ascii_lowercase().as_str() {
                "true" | "y" | "yes" => Self::Boolean(true),
                "false" | "n" | "no" => Self::Boolean(false),
                _ => return BooleanSnafu { input }.fail(),
            },
            ValueType::Timestamp => Self::Timestamp(
                DateTime::parse_from_rfc3339(input.trim())
                    .context(TimestampSnafu { input })?
                    .with_timezone(&Utc),
            ),
            ValueType::Binary => Self::Binary(Bytes::copy_from_slice(input.as_bytes())),
        })
    }

    /// Feeds a platform independent encoding of this value into `hasher`.
    ///
    /// Partition assignment depends on this being stable across runs and hosts.
    pub fn hash_stable<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Self::Null => hasher.write_u8(0),
            Self::Integer(value) => {
                hasher.write_u8(1);
                hasher.write(&value.to_le_bytes());
            }
            Self::Number(value) => {
                hasher.write_u8(2);
                hasher.write(&value.to_bits().to_le_bytes());
            }
            Self::String(value) => {
                hasher.write_u8(3);
                hasher.write(&(value.len() as u64).to_le_bytes());
                hasher.write(value.as_bytes());
            }
            Self::Boolean(value) => {
                hasher.write_u8(4);
                hasher.write_u8(u8::from(*value));
            }
            Self::Timestamp(value) => {
                hasher.write_u8(5);
                hasher.write(&value.timestamp().to_le_bytes());
                hasher.write(&value.timestamp_subsec_nanos().to_le_bytes());
            }
            Self::Binary(value) => {
                hasher.write_u8(6);
                hasher.write(&(value.len() as u64).to_le_bytes());
                hasher.write(value);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<null>"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Timestamp(value) => f.write_str(&value.to_rfc3339()),
            Self::Binary(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}
