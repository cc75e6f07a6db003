//! docsql Intermediate Representation (IR)
//!
//! Typed document-store commands produced by the SQL translator: filters,
//! aggregation pipelines and write commands, plus the document value model
//! they operate on. Every command renders to canonical JSON in the shape the
//! store's query language uses, and fingerprints deterministically.

mod expr;
mod filter;
mod params;
mod pipeline;
mod query;
mod types;
mod value;

pub use expr::*;
pub use filter::*;
pub use params::Params;
pub use pipeline::*;
pub use query::*;
pub use types::*;
pub use value::*;

pub use indexmap::IndexMap;
pub use rust_decimal::Decimal;

/// Build a [`Document`] from `key => value` pairs.
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut doc = $crate::Document::new();
        $( doc.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        doc
    }};
}
