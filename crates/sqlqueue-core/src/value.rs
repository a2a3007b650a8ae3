//! Bindable SQL values.

use crate::error::{Error, TypeError};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// A value that can be bound to a statement parameter or read from a result
/// column.
///
/// The set of variants is closed: every input is converted into one of these
/// before it reaches the engine. Values with no dedicated variant go through
/// [`Value::rendered`], which keeps their textual form and flags them so the
/// binder can log the unusual input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value, bound as 0/1
    Bool(bool),

    /// Integer that fits the engine's 32-bit bind entry point
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Point in time; bound per the connection's [`DateFormat`] policy
    Date(DateTime<Utc>),

    /// UUID, bound as its hyphenated string form
    Uuid(uuid::Uuid),

    /// JSON document, bound as text
    Json(serde_json::Value),

    /// Any other value, bound through its textual representation
    Rendered(String),
}

impl Value {
    /// Bind an arbitrary displayable value as text.
    ///
    /// Use this for scalars without a dedicated variant, such as URLs.
    pub fn rendered(value: impl fmt::Display) -> Self {
        Value::Rendered(value.to_string())
    }

    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Rendered(_) => "RENDERED",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Rendered(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

macro_rules! impl_from_narrow_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i32::from(v))
                }
            }
        )*
    };
}

impl_from_narrow_int!(i8, i16, u8, u16);

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::BigInt(v as i64)
    }
}

impl TryFrom<u64> for Value {
    type Error = Error;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        i64::try_from(v).map(Value::BigInt).map_err(|_| {
            Error::Type(TypeError {
                expected: "integer no larger than i64::MAX",
                actual: v.to_string(),
                column: None,
            })
        })
    }
}

impl TryFrom<usize> for Value {
    type Error = Error;

    fn try_from(v: usize) -> Result<Self, Self::Error> {
        Value::try_from(v as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<SystemTime> for Value {
    fn from(v: SystemTime) -> Self {
        Value::Date(DateTime::<Utc>::from(v))
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// How dates are written to and read from the database.
///
/// When a connection has no date format configured, dates are stored as
/// floating-point seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    /// RFC 3339 with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
    Rfc3339,
    /// A `chrono` strftime pattern, interpreted in UTC
    Pattern(String),
}

impl DateFormat {
    /// Render a date as text.
    pub fn format(&self, date: &DateTime<Utc>) -> String {
        match self {
            DateFormat::Rfc3339 => date.to_rfc3339_opts(SecondsFormat::Millis, true),
            DateFormat::Pattern(pattern) => date.format(pattern).to_string(),
        }
    }

    /// Parse text produced by [`format`](Self::format).
    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        match self {
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            DateFormat::Pattern(pattern) => NaiveDateTime::parse_from_str(text, pattern)
                .ok()
                .map(|naive| naive.and_utc()),
        }
    }
}

/// Convert a date to fractional seconds since the Unix epoch.
pub fn date_to_epoch_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp() as f64 + f64::from(date.timestamp_subsec_nanos()) / 1_000_000_000.0
}

/// Convert fractional seconds since the Unix epoch back into a date.
#[allow(clippy::cast_possible_truncation)]
pub fn epoch_seconds_to_date(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos.min(999_999_999))
}
