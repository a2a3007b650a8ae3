//! Argument sets for statement execution.

use crate::value::Value;

/// The arguments bound to a statement for one execution.
///
/// A statement is bound either entirely by position or entirely by name,
/// never a mix of both.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// Nothing to bind
    #[default]
    None,
    /// Bound in order to `?` / `?NNN` parameters; the count must match exactly
    Positional(Vec<Value>),
    /// Bound to `:name` parameters; unknown names are logged and skipped
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Build a named argument set.
    ///
    /// Keys may be given with or without the leading `:`.
    pub fn named<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns `true` if there is nothing to bind.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(pairs) => pairs.is_empty(),
        }
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<&[Value]> for Params {
    fn from(values: &[Value]) -> Self {
        Params::Positional(values.to_vec())
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.into())
    }
}

/// Convenience macro for building positional argument lists.
///
/// Usage: `params![1_i64, blob.as_slice(), "text"]`
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($val:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($val)),+])
    };
}

/// Convenience macro for building named argument lists.
///
/// Usage: `named_params! { "id" => 1, "name" => "Alice" }`
#[macro_export]
macro_rules! named_params {
    ($($key:expr => $val:expr),* $(,)?) => {
        $crate::Params::Named(vec![$(($key.to_string(), $crate::Value::from($val))),*])
    };
}
