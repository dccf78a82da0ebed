//! Value Records
//!
//! Payloads referenced by index entries: a plain byte string or a list of
//! byte strings.

mod list;

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};

pub use list::{ListEnd, ListValue, Selection, SetOutcome};

/// A stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// An exact byte sequence
    String(Vec<u8>),

    /// An ordered sequence of byte-string entries
    List(ListValue),
}

impl Value {
    /// Human-readable type name, used in `WrongType` errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Build a string value, reporting allocation failure instead of aborting
    pub fn string_from(bytes: &[u8]) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes.len())?;
        buf.extend_from_slice(bytes);
        Ok(Value::String(buf))
    }

    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            Value::String(bytes) => Ok(bytes),
            other => Err(EmberError::WrongType {
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_list(&self) -> Result<&ListValue> {
        match self {
            Value::List(list) => Ok(list),
            other => Err(EmberError::WrongType {
                expected: "list",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut ListValue> {
        match self {
            Value::List(list) => Ok(list),
            other => Err(EmberError::WrongType {
                expected: "list",
                found: other.type_name(),
            }),
        }
    }

    /// Approximate heap footprint in bytes
    pub fn size(&self) -> usize {
        match self {
            Value::String(bytes) => bytes.len(),
            Value::List(list) => list.iter().map(|entry| entry.len()).sum(),
        }
    }
}

impl From<ListValue> for Value {
    fn from(list: ListValue) -> Self {
        Value::List(list)
    }
}
