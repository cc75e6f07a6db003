//! Statement parameters

use indexmap::IndexMap;

use crate::value::Value;

/// Values bound to `?` (positional) or `:name` (named) placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(IndexMap<String, Value>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }

    pub fn positional(&self, index: usize) -> Option<&Value> {
        match self {
            Params::Positional(values) => values.get(index),
            _ => None,
        }
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        match self {
            Params::Named(values) => values.get(name),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(values) => values.len(),
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.into())
    }
}

impl From<IndexMap<String, Value>> for Params {
    fn from(values: IndexMap<String, Value>) -> Self {
        Params::Named(values)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Params {
    fn from(values: [(&str, Value); N]) -> Self {
        Params::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}
