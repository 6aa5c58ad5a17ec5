//! Structured reader/writer abstraction and document backends.
//!
//! Reflection `load`/`save` never touch a concrete format. They read and
//! write named fields through [`SerializeReader`] / [`SerializeWriter`], which
//! are implemented over `serde_json` object maps. The same value tree is
//! stored on disk either as JSON text or as MessagePack bytes, selected by
//! [`DocumentFormat`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ReflectError;

// ---------------------------------------------------------------------------
// Reader / writer traits
// ---------------------------------------------------------------------------

/// Read access to the named fields of one structured object.
pub trait SerializeReader {
    /// Value stored under `name`, or `None` when absent.
    fn read_field(&self, name: &str) -> Option<&Value>;

    /// Every field name present.
    fn field_names(&self) -> Vec<&str>;
}

/// Write access to the named fields of one structured object.
pub trait SerializeWriter {
    /// Store `value` under `name`, replacing any previous value.
    fn write_field(&mut self, name: &str, value: Value);
}

impl SerializeReader for Map<String, Value> {
    fn read_field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn field_names(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

impl SerializeWriter for Map<String, Value> {
    fn write_field(&mut self, name: &str, value: Value) {
        self.insert(name.to_owned(), value);
    }
}

/// A non-object value reads as an object with no fields.
impl SerializeReader for Value {
    fn read_field(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(name))
    }

    fn field_names(&self) -> Vec<&str> {
        self.as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Document formats
// ---------------------------------------------------------------------------

/// On-disk encoding of a structured document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    /// UTF-8 JSON text.
    Json,
    /// MessagePack with named map keys.
    MessagePack,
}

/// Parse `bytes` into a document value.
pub fn read_document(format: DocumentFormat, bytes: &[u8]) -> Result<Value, ReflectError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| ReflectError::Document {
                details: format!("invalid JSON: {e}"),
            })
        }
        DocumentFormat::MessagePack => {
            rmp_serde::from_slice(bytes).map_err(|e| ReflectError::Document {
                details: format!("invalid MessagePack: {e}"),
            })
        }
    }
}

/// Encode a document value.
pub fn write_document(format: DocumentFormat, value: &Value) -> Result<Vec<u8>, ReflectError> {
    match format {
        DocumentFormat::Json => serde_json::to_vec_pretty(value).map_err(|e| {
            ReflectError::Document {
                details: format!("JSON encode failed: {e}"),
            }
        }),
        DocumentFormat::MessagePack => {
            rmp_serde::to_vec_named(value).map_err(|e| ReflectError::Document {
                details: format!("MessagePack encode failed: {e}"),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
