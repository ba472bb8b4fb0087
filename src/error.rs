use crate::store::{Key, Path};
use thiserror::Error;

/// Errors raised by path-scoped writes and typed access.
///
/// Reads never fail: a path that does not resolve yields `Value::Null`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write had to pass through a scalar (string, number, bool).
    #[error("cannot write through `{path}`: found {found}, expected an object or array")]
    NotAContainer { path: Path, found: &'static str },

    /// A field key was used on an array, or an index key on an object.
    #[error("key `{key}` does not apply at `{path}`: found {found}")]
    KeyMismatch {
        path: Path,
        key: Key,
        found: &'static str,
    },

    /// Array index past the end (writing at `len` appends).
    #[error("index {index} out of bounds at `{path}` (len {len})")]
    IndexOutOfBounds { path: Path, index: usize, len: usize },

    #[error("malformed JSON pointer `{0}`")]
    InvalidPointer(String),

    #[error("value at `{path}` does not match the requested type")]
    Decode {
        path: Path,
        #[source]
        source: serde_json::Error,
    },

    #[error("value for `{path}` could not be serialized")]
    Encode {
        path: Path,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Short name of a JSON value's kind, used in error messages.
pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
