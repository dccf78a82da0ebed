//! Snapshot codec
//!
//! Full dump of the index, written in ascending key order.
//!
//! ## File Format (version 1, all integers little-endian)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "EKVS" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Entries (Count times, strictly ascending keys)          │
//! │   [KeyLen: u32][Key][Tag: u8][Payload]                  │
//! │   Tag 0x01 string: [Len: u32][Bytes]                    │
//! │   Tag 0x02 list:   [Count: u32] then [Len: u32][Bytes]  │
//! │                    per entry, head to tail              │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   CRC32 of every preceding byte                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EmberError, Result};
use crate::index::RbTree;
use crate::value::{ListValue, Value};

/// Magic bytes identifying an EmberKV snapshot
pub const MAGIC: &[u8; 4] = b"EKVS";

/// Current snapshot format version
pub const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub const HEADER_SIZE: usize = 14;

/// Footer size: CRC32 (4)
pub const FOOTER_SIZE: usize = 4;

/// Type tag for string records
pub const TAG_STRING: u8 = 0x01;

/// Type tag for list records
pub const TAG_LIST: u8 = 0x02;

// =============================================================================
// Encoding
// =============================================================================

/// Serialize every entry of `index`
pub fn encode(index: &RbTree<Value>) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + FOOTER_SIZE + 64 * index.len());

    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u64_le(index.len() as u64);

    for (key, value) in index.iter() {
        put_chunk(&mut buf, key)?;
        match value {
            Value::String(bytes) => {
                buf.put_u8(TAG_STRING);
                put_chunk(&mut buf, bytes)?;
            }
            Value::List(list) => {
                buf.put_u8(TAG_LIST);
                buf.put_u32_le(length_u32(list.len())?);
                for entry in list.iter() {
                    put_chunk(&mut buf, entry)?;
                }
            }
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);

    Ok(buf.freeze())
}

fn length_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        EmberError::Serialization(format!("length {} does not fit the snapshot format", len))
    })
}

fn put_chunk(buf: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    buf.put_u32_le(length_u32(bytes.len())?);
    buf.put_slice(bytes);
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Rebuild an index from a snapshot
///
/// Any format violation yields `CorruptData`; nothing partial is returned.
pub fn decode(bytes: &[u8]) -> Result<RbTree<Value>> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(corrupt(format!(
            "snapshot is {} bytes, shorter than header and footer",
            bytes.len()
        )));
    }

    let (body, footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let stored_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let actual_crc = crc32fast::hash(body);

    let mut buf = body;
    if &buf[..4] != MAGIC {
        return Err(corrupt(format!(
            "invalid snapshot magic: expected EKVS, got {:?}",
            &buf[..4]
        )));
    }
    buf.advance(4);

    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(corrupt(format!("unsupported snapshot version: {}", version)));
    }
    if stored_crc != actual_crc {
        return Err(corrupt(format!(
            "snapshot checksum mismatch: stored {:08x}, computed {:08x}",
            stored_crc, actual_crc
        )));
    }

    let count = buf.get_u64_le();
    let mut index = RbTree::new();
    let mut previous: Option<Vec<u8>> = None;

    for n in 0..count {
        let key = take_chunk(&mut buf, "key")?;
        if previous.as_deref().map_or(false, |prev| key.as_slice() <= prev) {
            return Err(corrupt(format!("entry {} is out of key order", n)));
        }

        let tag = take_u8(&mut buf, "type tag")?;
        let value = match tag {
            TAG_STRING => Value::String(take_chunk(&mut buf, "string payload")?),
            TAG_LIST => {
                let entries = take_u32(&mut buf, "list length")?;
                let mut list = ListValue::new();
                for _ in 0..entries {
                    list.push_back(&take_chunk(&mut buf, "list entry")?)?;
                }
                Value::List(list)
            }
            other => return Err(corrupt(format!("unknown type tag 0x{:02x} in entry {}", other, n))),
        };

        index.insert(key.clone(), value);
        previous = Some(key);
    }

    if buf.has_remaining() {
        return Err(corrupt(format!(
            "{} trailing bytes after {} entries",
            buf.remaining(),
            count
        )));
    }

    Ok(index)
}

fn corrupt(message: String) -> EmberError {
    EmberError::CorruptData(message)
}

fn take_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(corrupt(format!("truncated snapshot reading {}", what)));
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(corrupt(format!("truncated snapshot reading {}", what)));
    }
    Ok(buf.get_u32_le())
}

fn take_chunk(buf: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = take_u32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(corrupt(format!(
            "truncated snapshot: {} needs {} bytes, {} left",
            what,
            len,
            buf.remaining()
        )));
    }
    let chunk = buf[..len].to_vec();
    buf.advance(len);
    Ok(chunk)
}
