//! Request definitions
//!
//! A request is the unit of mutation or lookup handed to the engine. Each
//! variant carries only the fields its operation needs.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{EmberError, Result};
use crate::hash;
use crate::value::{Selection, Value};

/// Request kinds, with stable one-byte codes for binding layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    ListRPush = 0x01,
    ListLPush = 0x02,
    ListRemove = 0x03,
    ListLookup = 0x04,
    StringInsert = 0x05,
    StringRemove = 0x06,
    StringLookup = 0x07,
    ListSet = 0x08,
    ListLength = 0x09,
    KeyDelete = 0x0a,
}

impl RequestKind {
    pub const ALL: [RequestKind; 10] = [
        RequestKind::ListRPush,
        RequestKind::ListLPush,
        RequestKind::ListRemove,
        RequestKind::ListLookup,
        RequestKind::StringInsert,
        RequestKind::StringRemove,
        RequestKind::StringLookup,
        RequestKind::ListSet,
        RequestKind::ListLength,
        RequestKind::KeyDelete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RequestKind::ListRPush => "list-rpush",
            RequestKind::ListLPush => "list-lpush",
            RequestKind::ListRemove => "list-remove",
            RequestKind::ListLookup => "list-lookup",
            RequestKind::StringInsert => "string-insert",
            RequestKind::StringRemove => "string-remove",
            RequestKind::StringLookup => "string-lookup",
            RequestKind::ListSet => "list-set",
            RequestKind::ListLength => "list-length",
            RequestKind::KeyDelete => "key-delete",
        }
    }

    /// Whether requests of this kind change the index
    pub fn is_mutation(self) -> bool {
        !matches!(
            self,
            RequestKind::ListLookup | RequestKind::StringLookup | RequestKind::ListLength
        )
    }
}

impl TryFrom<u8> for RequestKind {
    type Error = EmberError;

    fn try_from(code: u8) -> Result<Self> {
        RequestKind::ALL
            .into_iter()
            .find(|kind| *kind as u8 == code)
            .ok_or_else(|| EmberError::InvalidRequestType(format!("0x{:02x}", code)))
    }
}

impl FromStr for RequestKind {
    type Err = EmberError;

    fn from_str(s: &str) -> Result<Self> {
        RequestKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| EmberError::InvalidRequestType(s.to_string()))
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The operation a request performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Append one entry at the list tail
    ListRPush { key: Vec<u8>, value: Vec<u8> },

    /// Prepend one entry at the list head
    ListLPush { key: Vec<u8>, value: Vec<u8> },

    /// Remove the selected list entries
    ListRemove { key: Vec<u8>, selection: Selection },

    /// Read the selected list entries
    ListLookup { key: Vec<u8>, selection: Selection },

    /// Overwrite one list entry (appends past the end)
    ListSet { key: Vec<u8>, index: i64, value: Vec<u8> },

    /// Number of entries in a list
    ListLength { key: Vec<u8> },

    /// Replace the whole string value
    StringInsert { key: Vec<u8>, value: Vec<u8> },

    /// Remove a string record
    StringRemove { key: Vec<u8> },

    /// Read a string record
    StringLookup { key: Vec<u8> },

    /// Remove any record
    KeyDelete { key: Vec<u8> },
}

impl Operation {
    pub fn kind(&self) -> RequestKind {
        match self {
            Operation::ListRPush { .. } => RequestKind::ListRPush,
            Operation::ListLPush { .. } => RequestKind::ListLPush,
            Operation::ListRemove { .. } => RequestKind::ListRemove,
            Operation::ListLookup { .. } => RequestKind::ListLookup,
            Operation::ListSet { .. } => RequestKind::ListSet,
            Operation::ListLength { .. } => RequestKind::ListLength,
            Operation::StringInsert { .. } => RequestKind::StringInsert,
            Operation::StringRemove { .. } => RequestKind::StringRemove,
            Operation::StringLookup { .. } => RequestKind::StringLookup,
            Operation::KeyDelete { .. } => RequestKind::KeyDelete,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Operation::ListRPush { key, .. }
            | Operation::ListLPush { key, .. }
            | Operation::ListRemove { key, .. }
            | Operation::ListLookup { key, .. }
            | Operation::ListSet { key, .. }
            | Operation::ListLength { key }
            | Operation::StringInsert { key, .. }
            | Operation::StringRemove { key }
            | Operation::StringLookup { key }
            | Operation::KeyDelete { key } => key,
        }
    }
}

/// A timestamped operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when the request was created
    pub timestamp: u64,

    /// Stable hash of the key
    pub hash: u64,
}

impl Request {
    /// Stamp an operation with the current time and its key hash
    pub fn new(operation: Operation) -> Self {
        let hash = hash::hash(operation.key());
        Self {
            operation,
            timestamp: now_millis(),
            hash,
        }
    }

    /// Build a request from a kind and positional arguments
    ///
    /// This is the entry point for binding layers that receive the kind as
    /// data. Argument layout per kind:
    /// - push / string insert: `[value]`
    /// - list remove / lookup: `[start, end]` or `["@", i, j, ...]` for an
    ///   explicit index set
    /// - list set: `[index, value]`
    /// - everything else: `[]`
    pub fn from_parts(kind: RequestKind, key: &[u8], args: &[&[u8]]) -> Result<Self> {
        let key = key.to_vec();
        let operation = match kind {
            RequestKind::ListRPush => Operation::ListRPush {
                key,
                value: single_arg(kind, args)?.to_vec(),
            },
            RequestKind::ListLPush => Operation::ListLPush {
                key,
                value: single_arg(kind, args)?.to_vec(),
            },
            RequestKind::ListRemove => Operation::ListRemove {
                key,
                selection: parse_selection(kind, args)?,
            },
            RequestKind::ListLookup => Operation::ListLookup {
                key,
                selection: parse_selection(kind, args)?,
            },
            RequestKind::ListSet => match args {
                [index, value] => Operation::ListSet {
                    key,
                    index: parse_index(kind, index)?,
                    value: value.to_vec(),
                },
                _ => return Err(arity(kind, "an index and a value")),
            },
            RequestKind::StringInsert => Operation::StringInsert {
                key,
                value: single_arg(kind, args)?.to_vec(),
            },
            RequestKind::ListLength => no_args(kind, args, Operation::ListLength { key })?,
            RequestKind::StringRemove => no_args(kind, args, Operation::StringRemove { key })?,
            RequestKind::StringLookup => no_args(kind, args, Operation::StringLookup { key })?,
            RequestKind::KeyDelete => no_args(kind, args, Operation::KeyDelete { key })?,
        };
        Ok(Request::new(operation))
    }

    pub fn kind(&self) -> RequestKind {
        self.operation.kind()
    }

    pub fn key(&self) -> &[u8] {
        self.operation.key()
    }
}

impl From<Operation> for Request {
    fn from(operation: Operation) -> Self {
        Request::new(operation)
    }
}

/// Result of executing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Mutation applied, nothing to report
    Done,

    /// A single byte string (string lookup or removal)
    Bytes(Vec<u8>),

    /// List entries in selection order
    Entries(Vec<Vec<u8>>),

    /// A count (list length, entries removed)
    Count(usize),

    /// The record a mutation displaced, if any
    Previous(Option<Value>),
}

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Argument Parsing
// =============================================================================

fn arity(kind: RequestKind, expected: &str) -> EmberError {
    EmberError::InvalidRequestType(format!("{} expects {}", kind, expected))
}

fn single_arg<'a>(kind: RequestKind, args: &[&'a [u8]]) -> Result<&'a [u8]> {
    match args {
        [value] => Ok(*value),
        _ => Err(arity(kind, "exactly one value")),
    }
}

fn no_args(kind: RequestKind, args: &[&[u8]], operation: Operation) -> Result<Operation> {
    if args.is_empty() {
        Ok(operation)
    } else {
        Err(arity(kind, "no arguments"))
    }
}

fn parse_index(kind: RequestKind, raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            EmberError::InvalidRequestType(format!(
                "{}: {:?} is not an index",
                kind,
                String::from_utf8_lossy(raw)
            ))
        })
}

fn parse_selection(kind: RequestKind, args: &[&[u8]]) -> Result<Selection> {
    match args {
        [marker, rest @ ..] if *marker == b"@" => {
            let indexes = rest
                .iter()
                .map(|raw| parse_index(kind, raw))
                .collect::<Result<Vec<_>>>()?;
            Ok(Selection::Indexes(indexes))
        }
        [start, end] => Ok(Selection::Range {
            start: parse_index(kind, start)?,
            end: parse_index(kind, end)?,
        }),
        [index] => Ok(Selection::single(parse_index(kind, index)?)),
        _ => Err(arity(kind, "a start and end index, or '@' and an index list")),
    }
}
