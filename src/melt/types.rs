use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single-level record: path keys mapped to terminal values
pub type FlatRecord = Map<String, Value>;

/// Errors raised while flattening one record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlattenError {
    /// The record itself is not a mapping
    #[error("malformed record: expected an object, found {found}")]
    Malformed { found: &'static str },

    /// Nesting went deeper than the configured limit
    #[error("record nesting exceeds max depth {max_depth} at '{path}'")]
    DepthExceeded { path: String, max_depth: usize },

    /// Separator must be non-empty
    #[error("path separator must not be empty")]
    InvalidSeparator,
}

/// Configuration for the flattening process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenConfig {
    /// Separator placed between path segments
    pub separator: String,

    /// Maximum number of nested levels below the record root
    pub max_depth: usize,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        FlattenConfig {
            separator: String::from("_"),
            max_depth: 64,
        }
    }
}

/// Short name of a JSON value's kind, used in diagnostics
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
