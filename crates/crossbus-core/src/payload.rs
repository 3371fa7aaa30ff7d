//! Payload model: an opaque value plus the serialization descriptor a remote
//! peer needs to reconstruct it.
//!
//! The tag is attached by whichever component produces the payload; the
//! envelope never inspects the value to derive type information.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Serialization descriptor for a payload or routing-info value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTag {
    /// Type name as assigned by the serialization layer.
    pub name: String,
    /// Defining module (assembly/crate) name.
    pub module: String,
}

impl TypeTag {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
        }
    }
}

/// The opaque value a payload carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadData {
    Json(serde_json::Value),
    Binary(Bytes),
}

/// One message payload: opaque data plus an optional type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub tag: Option<TypeTag>,
    pub data: PayloadData,
}

impl Payload {
    /// JSON payload without a type tag.
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            tag: None,
            data: PayloadData::Json(value),
        }
    }

    /// Convenience for plain string payloads.
    pub fn text(s: impl Into<String>) -> Self {
        Self::json(serde_json::Value::String(s.into()))
    }

    /// Binary payload without a type tag.
    pub fn binary(bytes: Bytes) -> Self {
        Self {
            tag: None,
            data: PayloadData::Binary(bytes),
        }
    }

    pub fn with_tag(mut self, tag: TypeTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Borrow the JSON value, if this payload is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match &self.data {
            PayloadData::Json(v) => Some(v),
            PayloadData::Binary(_) => None,
        }
    }

    /// Borrow the string value, if this payload is a JSON string.
    pub fn as_text(&self) -> Option<&str> {
        self.as_json().and_then(|v| v.as_str())
    }
}
